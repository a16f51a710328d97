//! Error types for the relay engine.

/// Top-level error type for a relay run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No default rule could be resolved from the rule list")]
    NoDefaultRule,

    #[error("Failed to parse rules file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Search failed for query {query:?}: {reason}")]
    SearchFailed { query: String, reason: String },

    #[error("Mailbox returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Failed to resolve account addresses: {0}")]
    Profile(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Webhook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook POST to {url} failed: {reason}")]
    SendFailed { url: String, reason: String },
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read checkpoint: {0}")]
    Read(String),

    #[error("Failed to write checkpoint: {0}")]
    Write(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
