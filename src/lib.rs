//! inbox-relay — polls a mailbox and relays new messages to webhooks by
//! rule, deduplicated and rate limited.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod matcher;
pub mod notify;
pub mod payload;
pub mod rules;
pub mod window;
