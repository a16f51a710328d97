//! Run orchestration — one full check cycle from rule resolution through
//! checkpoint commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::mailbox::MailFetcher;
use crate::matcher::{Matcher, INBOX_QUERY};
use crate::notify::Notifier;
use crate::rules::{resolve, Resolution, Rule};
use crate::window::{CheckpointStore, CheckpointTracker};

/// The relay engine: wires the fetcher, notifier, and checkpoint store
/// into a single sequential check cycle.
pub struct Engine {
    fetcher: Arc<dyn MailFetcher>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn CheckpointStore>,
}

impl Engine {
    pub fn new(
        fetcher: Arc<dyn MailFetcher>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            fetcher,
            notifier,
            store,
        }
    }

    /// Run one check cycle ending now.
    pub async fn check_mail(&self, rules: &[Rule]) -> Result<()> {
        self.check_mail_at(rules, Utc::now()).await
    }

    /// Run one check cycle with an explicit end-of-window instant.
    ///
    /// Flow: resolve rules → open window → fetch the unscoped inbox window
    /// (empty ⇒ commit and stop) → match and dedup per rule → dispatch in
    /// timestamp order → commit the checkpoint captured at run start.
    pub async fn check_mail_at(&self, rules: &[Rule], now: DateTime<Utc>) -> Result<()> {
        let resolved = match resolve(rules)? {
            Resolution::Active(resolved) => resolved,
            Resolution::NothingToDo => {
                // Checkpoint deliberately untouched: the window was never
                // opened, nothing got marked processed.
                info!("No deliverable rules configured, skipping run");
                return Ok(());
            }
        };

        let (tracker, window) =
            CheckpointTracker::open(Arc::clone(&self.store), now).await?;
        debug!(
            last_checked = window.last_checked,
            next_check = window.next_check,
            "Opened window"
        );

        // Unscoped pass over the whole inbox window. Failure here aborts
        // the run: without it the fallback rule would silently miss mail.
        let window_query = format!("{INBOX_QUERY} {}", window.date_range_query());
        let window_threads = self.fetcher.search(&window_query).await?;

        if window_threads.is_empty() {
            info!("Window is empty, committing checkpoint");
            tracker.commit().await?;
            return Ok(());
        }

        let own_addresses = self.fetcher.own_addresses().await?;
        let account = own_addresses.first().cloned().unwrap_or_default();

        let matcher = Matcher::new(self.fetcher.as_ref(), own_addresses);
        let plan = matcher.collect(&window, &resolved, &window_threads).await?;
        info!(planned = plan.len(), "Delivery plan built");

        let dispatcher = Dispatcher::new(self.notifier.as_ref(), account);
        let delivered = dispatcher.dispatch(plan, &resolved.fallback).await;
        info!(delivered, "Run complete");

        tracker.commit().await?;
        Ok(())
    }
}
