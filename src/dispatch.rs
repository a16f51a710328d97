//! Dispatch scheduling — chronological ordering, webhook resolution, and
//! the anti-burst throttle between sends.

use std::time::Duration;

use tracing::{debug, warn};

use crate::matcher::DeliveryItem;
use crate::notify::Notifier;
use crate::payload::build_payload;
use crate::rules::Rule;

/// Outbound delivery budget per minute.
pub const RATE_LIMIT_PER_MINUTE: usize = 50;

/// Pace when the plan exceeds the per-minute budget.
const SLOW_PACE: Duration = Duration::from_millis(60_000 / RATE_LIMIT_PER_MINUTE as u64);
/// Pace for small plans. Anti-burst padding, not a real rate limiter.
const FAST_PACE: Duration = Duration::from_millis(500);

/// Select the inter-send pause for a plan of the given length.
pub fn pace_for(plan_len: usize) -> Duration {
    if plan_len > RATE_LIMIT_PER_MINUTE {
        SLOW_PACE
    } else {
        FAST_PACE
    }
}

/// Sends a delivery plan in timestamp order through a [`Notifier`].
pub struct Dispatcher<'a> {
    notifier: &'a dyn Notifier,
    /// Account address used in message deep links.
    account: String,
}

impl<'a> Dispatcher<'a> {
    pub fn new(notifier: &'a dyn Notifier, account: String) -> Self {
        Self { notifier, account }
    }

    /// Deliver the plan. Returns the number of successful sends.
    ///
    /// Ignored rules and unresolvable webhooks skip silently; a failed or
    /// non-2xx delivery is logged and never blocks the rest of the plan.
    pub async fn dispatch(&self, mut plan: Vec<DeliveryItem>, fallback: &Rule) -> usize {
        // Stable sort: equal timestamps keep rule-insertion order.
        plan.sort_by_key(|item| item.date);
        let pace = pace_for(plan.len());

        let mut delivered = 0usize;
        for item in &plan {
            if item.rule.ignore {
                debug!(id = %item.id, "Skipping ignored match");
                continue;
            }
            let Some(url) = item
                .rule
                .webhook_url
                .as_deref()
                .or(fallback.webhook_url.as_deref())
            else {
                debug!(id = %item.id, "No webhook URL resolvable, skipping");
                continue;
            };

            let payload = build_payload(item, fallback, &self.account);
            match self.notifier.post(url, &payload).await {
                Ok(resp) if resp.is_success() => {
                    debug!(id = %item.id, status = resp.status, "Delivered");
                    delivered += 1;
                }
                Ok(resp) => {
                    warn!(
                        id = %item.id,
                        status = resp.status,
                        body = %resp.body,
                        "Webhook rejected delivery"
                    );
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Webhook delivery failed");
                }
            }

            tokio::time::sleep(pace).await;
        }

        delivered
    }
}
