//! Delivery rules — matching queries paired with webhook configuration.
//!
//! A rule pairs an optional mailbox search query with the webhook it routes
//! matches to. Exactly one rule per run acts as the default (catch-all): it
//! is never evaluated by query, it claims every message no other rule did.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// A single delivery rule, as written in the rules file.
///
/// `discord_options` and `discord_embed_options` are opaque pass-through
/// objects: the engine never interprets their keys, it only overlays them
/// onto the outgoing payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rule {
    /// Mailbox search query. A rule with no query matches nothing directly
    /// and can only be useful as the default.
    pub query: Option<String>,
    /// Webhook endpoint for messages this rule claims.
    #[serde(rename = "webhookURL")]
    pub webhook_url: Option<String>,
    /// Drop matches silently instead of delivering them.
    pub ignore: bool,
    /// Extra top-level webhook payload fields.
    pub discord_options: Option<Map<String, Value>>,
    /// Extra embed fields.
    pub discord_embed_options: Option<Map<String, Value>>,
    /// Marks the catch-all rule.
    #[serde(rename = "default")]
    pub is_default: bool,
}

impl Rule {
    /// Whether this rule carries a non-empty query.
    pub fn has_query(&self) -> bool {
        self.query.as_deref().is_some_and(|q| !q.trim().is_empty())
    }
}

/// Outcome of rule-set resolution.
#[derive(Debug)]
pub enum Resolution {
    /// A usable rule set: the fallback plus the ordered non-default rules.
    Active(ResolvedRules),
    /// Nothing can ever be delivered — the caller must skip the run
    /// entirely, without advancing the checkpoint.
    NothingToDo,
}

/// A resolved rule set: the fallback split out, the rest in file order.
#[derive(Debug, Clone)]
pub struct ResolvedRules {
    /// The catch-all rule. Never evaluated by query.
    pub fallback: Arc<Rule>,
    /// Non-default rules, in the order they were configured. Earlier rules
    /// win dedup ties.
    pub rules: Vec<Arc<Rule>>,
}

/// Resolve a raw rule list into `(fallback, rest)`.
///
/// When no rule is marked default: an empty list, a list where every rule is
/// ignored, or a list where no rule has a webhook all resolve to
/// [`Resolution::NothingToDo`]. Otherwise the first query-less rule (or,
/// failing that, the first rule) is promoted to default. If more than one
/// rule is marked default, the first wins and the rest are demoted.
pub fn resolve(raw: &[Rule]) -> Result<Resolution, ConfigError> {
    let mut rules: Vec<Rule> = raw.to_vec();

    if !rules.iter().any(|r| r.is_default) {
        if rules.is_empty()
            || rules.iter().all(|r| r.ignore)
            || rules.iter().all(|r| r.webhook_url.is_none())
        {
            return Ok(Resolution::NothingToDo);
        }
        let idx = rules.iter().position(|r| !r.has_query()).unwrap_or(0);
        rules[idx].is_default = true;
    }

    let fallback_idx = rules
        .iter()
        .position(|r| r.is_default)
        .ok_or(ConfigError::NoDefaultRule)?;

    let mut fallback = rules.remove(fallback_idx);
    fallback.is_default = true;
    for rule in &mut rules {
        rule.is_default = false;
    }

    Ok(Resolution::Active(ResolvedRules {
        fallback: Arc::new(fallback),
        rules: rules.into_iter().map(Arc::new).collect(),
    }))
}
