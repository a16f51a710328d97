//! Mailbox access — the search seam the engine consumes, plus the Gmail
//! REST implementation of it.
//!
//! The engine only ever sees [`MailFetcher`]: a query string in, threads
//! out, and the account's own addresses for self-exclusion. Everything
//! Gmail-specific (REST paths, base64url bodies, header layout) stays here.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;

/// One message of a mail thread, headers pre-split by the backend.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Backend message id, unique within a run.
    pub id: String,
    /// Raw From header (may be `Name <addr>` form).
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    pub date: DateTime<Utc>,
    /// Label ids attached to the message.
    pub labels: Vec<String>,
}

/// A mail thread with its messages ordered oldest to newest.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<MailMessage>,
}

/// Search seam consumed by the matcher.
#[async_trait]
pub trait MailFetcher: Send + Sync {
    /// Execute a mailbox search query and return the matching threads.
    async fn search(&self, query: &str) -> Result<Vec<Thread>, FetchError>;

    /// The account's primary address (first) plus registered send-as
    /// aliases.
    async fn own_addresses(&self) -> Result<Vec<String>, FetchError>;
}

/// Extract the bare mailbox address from a From/To header value.
///
/// `"Alice Example <alice@example.com>"` → `alice@example.com`; a bare
/// address passes through trimmed.
pub fn mailbox_address(header: &str) -> &str {
    if let (Some(start), Some(end)) = (header.rfind('<'), header.rfind('>')) {
        if start < end {
            return header[start + 1..end].trim();
        }
    }
    header.trim()
}

/// Whether a From header names one of the account's own addresses.
pub fn is_own_address(from: &str, own: &[String]) -> bool {
    let addr = mailbox_address(from);
    own.iter()
        .any(|mine| addr.eq_ignore_ascii_case(mailbox_address(mine)))
}

// ── Gmail REST implementation ──────────────────────────────────────

const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const PAGE_SIZE: u32 = 100;

/// [`MailFetcher`] backed by the Gmail REST API with a bearer token.
pub struct GmailFetcher {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl GmailFetcher {
    pub fn new(token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: GMAIL_BASE_URL.to_string(),
        }
    }

    /// Point at a different API root (local test servers).
    pub fn with_base_url(token: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: base_url.into(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))
    }

    async fn fetch_thread(&self, id: &str) -> Result<Thread, FetchError> {
        let url = self.api_url(&format!("threads/{id}"));
        let thread: GmailThread = self.get_json(&url, &[("format", "full")]).await?;

        let mut messages: Vec<MailMessage> = thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(convert_message)
            .collect();
        messages.sort_by_key(|m| m.date);

        Ok(Thread {
            id: thread.id,
            messages,
        })
    }
}

#[async_trait]
impl MailFetcher for GmailFetcher {
    async fn search(&self, query: &str) -> Result<Vec<Thread>, FetchError> {
        let url = self.api_url("threads");
        let page_size = PAGE_SIZE.to_string();
        let mut refs: Vec<ThreadRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> =
                vec![("q", query), ("maxResults", &page_size)];
            if let Some(token) = &page_token {
                params.push(("pageToken", token));
            }
            let list: ThreadList = self
                .get_json(&url, &params)
                .await
                .map_err(|e| FetchError::SearchFailed {
                    query: query.to_string(),
                    reason: e.to_string(),
                })?;

            refs.extend(list.threads.unwrap_or_default());
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(query = %query, threads = refs.len(), "Mailbox search done");

        let mut threads = Vec::with_capacity(refs.len());
        for thread_ref in refs {
            threads.push(self.fetch_thread(&thread_ref.id).await?);
        }
        Ok(threads)
    }

    async fn own_addresses(&self) -> Result<Vec<String>, FetchError> {
        let profile: GmailProfile = self
            .get_json(&self.api_url("profile"), &[])
            .await
            .map_err(|e| FetchError::Profile(e.to_string()))?;

        let send_as: SendAsList = self
            .get_json(&self.api_url("settings/sendAs"), &[])
            .await
            .map_err(|e| FetchError::Profile(e.to_string()))?;

        // Primary address first; the engine uses it for deep links.
        let mut addresses = vec![profile.email_address];
        for entry in send_as.send_as.unwrap_or_default() {
            if let Some(alias) = entry.send_as_email {
                if !addresses.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
                    addresses.push(alias);
                }
            }
        }
        Ok(addresses)
    }
}

// ── Gmail wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadList {
    threads: Option<Vec<ThreadRef>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailThread {
    id: String,
    messages: Option<Vec<GmailMessage>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    label_ids: Option<Vec<String>>,
    /// Epoch milliseconds, as a decimal string.
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendAsList {
    send_as: Option<Vec<SendAsEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendAsEntry {
    send_as_email: Option<String>,
}

fn header_value(part: Option<&GmailPart>, name: &str) -> String {
    part.and_then(|p| p.headers.as_ref())
        .and_then(|headers| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        })
        .unwrap_or_default()
}

fn convert_message(msg: GmailMessage) -> MailMessage {
    let payload = msg.payload.as_ref();
    let date = msg
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| DateTime::from_timestamp_millis(ms))
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap_or_default());

    let body = payload
        .and_then(|p| extract_text_body(p, "text/plain"))
        .unwrap_or_default();

    MailMessage {
        id: msg.id,
        from: header_value(payload, "From"),
        to: header_value(payload, "To"),
        cc: header_value(payload, "Cc"),
        subject: header_value(payload, "Subject"),
        body,
        date,
        labels: msg.label_ids.unwrap_or_default(),
    }
}

/// Walk a MIME part tree and pull out the first matching text body,
/// decoding Gmail's base64url encoding (with lenient fallbacks).
fn extract_text_body(part: &GmailPart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            let trimmed = data.trim();
            let decoded = general_purpose::URL_SAFE_NO_PAD
                .decode(trimmed)
                .or_else(|_| general_purpose::URL_SAFE.decode(trimmed))
                .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
                .or_else(|_| general_purpose::STANDARD.decode(trimmed));
            return match decoded {
                Ok(bytes) => String::from_utf8(bytes).ok(),
                // Some backends hand the content through undecoded.
                Err(_) => Some(trimmed.to_string()),
            };
        }
    }

    if let Some(parts) = &part.parts {
        let mut full_body = String::new();
        for p in parts {
            if let Some(body) = extract_text_body(p, mime_type) {
                full_body.push_str(&body);
            }
        }
        if !full_body.is_empty() {
            return Some(full_body);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn mailbox_address_strips_display_name() {
        assert_eq!(
            mailbox_address("Alice Example <alice@example.com>"),
            "alice@example.com"
        );
    }

    #[test]
    fn mailbox_address_passes_bare_address() {
        assert_eq!(mailbox_address("  bob@example.com "), "bob@example.com");
    }

    #[test]
    fn is_own_address_is_case_insensitive() {
        let own = vec!["Me@Example.com".to_string()];
        assert!(is_own_address("Myself <me@example.com>", &own));
        assert!(!is_own_address("Other <other@example.com>", &own));
    }

    #[test]
    fn converts_gmail_message() {
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode("Hello there");
        let json = serde_json::json!({
            "id": "m1",
            "labelIds": ["INBOX", "IMPORTANT"],
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    { "name": "From", "value": "Alice <alice@example.com>" },
                    { "name": "To", "value": "me@example.com" },
                    { "name": "Subject", "value": "Hi" }
                ],
                "body": { "data": encoded }
            }
        });
        let msg: GmailMessage = serde_json::from_value(json).unwrap();
        let converted = convert_message(msg);
        assert_eq!(converted.id, "m1");
        assert_eq!(converted.from, "Alice <alice@example.com>");
        assert_eq!(converted.subject, "Hi");
        assert_eq!(converted.cc, "");
        assert_eq!(converted.body, "Hello there");
        assert_eq!(converted.date.timestamp(), 1_700_000_000);
        assert_eq!(converted.labels, vec!["INBOX", "IMPORTANT"]);
    }

    #[test]
    fn extracts_body_from_multipart() {
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode("plain part");
        let json = serde_json::json!({
            "mimeType": "multipart/alternative",
            "parts": [
                { "mimeType": "text/html", "body": { "data": "aWdub3JlZA" } },
                { "mimeType": "text/plain", "body": { "data": encoded } }
            ]
        });
        let part: GmailPart = serde_json::from_value(json).unwrap();
        assert_eq!(
            extract_text_body(&part, "text/plain").as_deref(),
            Some("plain part")
        );
    }

    #[test]
    fn missing_body_yields_none() {
        let part: GmailPart =
            serde_json::from_value(serde_json::json!({ "mimeType": "text/plain" })).unwrap();
        assert!(extract_text_body(&part, "text/plain").is_none());
    }
}
