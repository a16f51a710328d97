//! Webhook delivery — the notifier seam and its reqwest implementation.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::NotifyError;

/// Response from a webhook POST. The body is parsed as JSON when possible,
/// kept as raw text otherwise; the engine only logs it either way.
#[derive(Debug, Clone)]
pub struct NotifyResponse {
    pub status: u16,
    pub body: Value,
}

impl NotifyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivery seam consumed by the dispatcher.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// POST a JSON payload to a webhook URL.
    ///
    /// An `Err` means the request never completed; a non-2xx response comes
    /// back as a normal [`NotifyResponse`] for the caller to log.
    async fn post(&self, url: &str, payload: &Value) -> Result<NotifyResponse, NotifyError>;
}

/// Parse a response body as JSON, falling back to the raw text.
pub fn parse_response_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::from(text))
}

/// [`Notifier`] backed by a shared reqwest client.
#[derive(Default)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, url: &str, payload: &Value) -> Result<NotifyResponse, NotifyError> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let body = parse_response_body(&text);
        debug!(url = %url, status, "Webhook response");

        Ok(NotifyResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_is_parsed() {
        let body = parse_response_body(r#"{"id":"123"}"#);
        assert_eq!(body["id"], "123");
    }

    #[test]
    fn non_json_body_falls_back_to_text() {
        let body = parse_response_body("rate limited");
        assert_eq!(body, Value::from("rate limited"));
    }

    #[test]
    fn empty_body_falls_back_to_text() {
        assert_eq!(parse_response_body(""), Value::from(""));
    }

    #[test]
    fn success_statuses() {
        let ok = NotifyResponse {
            status: 204,
            body: Value::Null,
        };
        assert!(ok.is_success());
        let bad = NotifyResponse {
            status: 429,
            body: Value::Null,
        };
        assert!(!bad.is_success());
    }
}
