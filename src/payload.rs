//! Webhook payload construction — embed layout, length caps, and the
//! shallow overlay of opaque rule options.

use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::matcher::DeliveryItem;
use crate::rules::Rule;

/// Hard cap on the embed title, ellipsis included.
pub const TITLE_MAX_CHARS: usize = 255;
/// Hard cap on the embed description, ellipsis included.
pub const BODY_MAX_CHARS: usize = 4096;
/// Placeholder for messages with a blank subject.
pub const UNTITLED: &str = "無題";

const ELLIPSIS: &str = "...";

/// Truncate to `max - 3` characters plus an ellipsis marker (total ≤
/// `max`) when the text exceeds the reserved length. Counted in
/// characters, not bytes.
fn truncate_chars(text: &str, max: usize) -> String {
    let keep = max - ELLIPSIS.len();
    if text.chars().count() <= keep {
        return text.to_string();
    }
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Shallow key-value overlay of two opaque option objects: `over` keys win
/// over `base` keys. Both sides optional.
pub fn overlay_options(
    base: Option<&Map<String, Value>>,
    over: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = Map::new();
    if let Some(base) = base {
        merged.extend(base.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(over) = over {
        merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Build the webhook JSON body for one delivery.
///
/// Option overlays (fallback keys, then matched-rule keys on top) are
/// spread over the built-in fields last, so a rule can override any of
/// them; the engine never interprets their contents.
pub fn build_payload(item: &DeliveryItem, fallback: &Rule, account: &str) -> Value {
    let title = truncate_chars(
        if item.subject.is_empty() {
            UNTITLED
        } else {
            &item.subject
        },
        TITLE_MAX_CHARS,
    );

    let mut header = format!("```To: {}", item.to);
    if !item.cc.is_empty() {
        header.push_str(&format!("\nCc: {}", item.cc));
    }
    header.push_str("```\n");
    header.push_str(&item.body);
    let description = truncate_chars(&header, BODY_MAX_CHARS);

    let mut embed = Map::new();
    embed.insert("type".into(), Value::from("rich"));
    embed.insert("title".into(), Value::from(title));
    embed.insert(
        "url".into(),
        Value::from(format!(
            "https://mail.google.com/mail/u/{account}/#inbox/{}",
            item.id
        )),
    );
    embed.insert("description".into(), Value::from(description));
    embed.insert(
        "timestamp".into(),
        Value::from(item.date.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    embed.insert(
        "author".into(),
        serde_json::json!({ "name": item.from }),
    );
    embed.extend(overlay_options(
        fallback.discord_embed_options.as_ref(),
        item.rule.discord_embed_options.as_ref(),
    ));

    let mut payload = Map::new();
    payload.insert("embeds".into(), Value::Array(vec![Value::Object(embed)]));
    payload.extend(overlay_options(
        fallback.discord_options.as_ref(),
        item.rule.discord_options.as_ref(),
    ));

    Value::Object(payload)
}
