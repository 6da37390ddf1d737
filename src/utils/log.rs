// src/utils/log.rs

//! Run-log formatting.
//!
//! Section helpers give long unattended runs a readable shape in the
//! captured log. The delivery event line is also a contract: it is what
//! `sync-done-from-log` parses to rebuild a lost checkpoint, so its format
//! must stay stable.

use serde_json::Value;

/// Event name written for every acknowledged delivery.
pub const DELIVERED_EVENT: &str = "delivered";

/// Message name used by the older JSON-lines logs for a created listing.
const LEGACY_DELIVERED_MSG: &str = "stream_create_success";

/// A successful delivery recovered from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEvent {
    pub item_id: String,
    /// Generation the delivery was checkpointed under, when the line records it.
    pub generation: Option<String>,
}

/// Format the delivery event line.
pub fn format_delivered(generation_key: &str, item_id: &str, url: &str) -> String {
    format!("{DELIVERED_EVENT} item={item_id} generation={generation_key} url={url}")
}

/// Log an acknowledged delivery.
pub fn delivered(generation_key: &str, item_id: &str, url: &str) {
    log::info!("{}", format_delivered(generation_key, item_id, url));
}

/// Recover a delivery event from one captured log line.
///
/// Understands both the `delivered item=...` lines and legacy JSON lines.
pub fn parse_delivered(line: &str) -> Option<DeliveredEvent> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        return parse_legacy_json(trimmed);
    }

    let marker = format!("{DELIVERED_EVENT} item=");
    let start = trimmed.find(&marker)?;
    let mut item_id = None;
    let mut generation = None;

    for token in trimmed[start + DELIVERED_EVENT.len()..].split_whitespace() {
        if let Some(value) = token.strip_prefix("item=") {
            item_id = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("generation=") {
            generation = Some(value.to_string());
        }
    }

    let item_id = item_id.filter(|id| !id.is_empty())?;
    Some(DeliveredEvent {
        item_id,
        generation,
    })
}

fn parse_legacy_json(line: &str) -> Option<DeliveredEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("msg")?.as_str()? != LEGACY_DELIVERED_MSG {
        return None;
    }
    let item_id = match value.get("offer_id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(DeliveredEvent {
        item_id,
        generation: None,
    })
}

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {}", title);
    for (key, value) in items {
        log::info!("    {}: {}", key, value);
    }
}
