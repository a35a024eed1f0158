//! Normalization of raw gateway payloads into the internal model.
//!
//! Pure functions, no I/O. Field names drift across gateway versions, so each
//! value is probed through an ordered list of known locations. Normalization
//! never fails a whole batch: a malformed entry degrades to documented
//! defaults (messages) or is discarded (contacts with no identifying field).

use crate::model::{
    default_payment_method, default_source, ChatMessage, Contact, DeliveryStatus, Direction,
};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Strip everything but ASCII digits (gateway phones are digits-only on the wire).
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Flatten an id-ish value to a string. Objects recurse into `.user` or
/// `._serialized`; anything else is JSON-stringified as a last resort.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("user")
            .or_else(|| map.get("_serialized"))
            .and_then(id_string)
            .or_else(|| serde_json::to_string(value).ok()),
        _ => None,
    }
}

fn probe<'a>(raw: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|f| {
        let v = raw.get(f)?;
        if v.is_null() {
            None
        } else {
            Some(v)
        }
    })
}

fn probe_str<'a>(raw: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields.iter().find_map(|f| raw.get(f).and_then(|v| v.as_str()))
}

/// Stable contact id from any accepted gateway shape, or `None` when no
/// identifying field is present (the entry is then discarded, never surfaced
/// with an empty id).
pub fn contact_id(raw: &Value) -> Option<String> {
    raw.get("id")
        .and_then(|id| id.get("user"))
        .and_then(id_string)
        .or_else(|| probe(raw, &["id", "_serialized", "jid", "number", "phone"]).and_then(id_string))
}

fn contact_phone(raw: &Value) -> Option<String> {
    raw.get("id")
        .and_then(|id| id.get("user"))
        .and_then(id_string)
        .or_else(|| probe(raw, &["id", "wa_id", "phone", "number"]).and_then(id_string))
        .map(|p| digits_only(&p))
        .filter(|p| !p.is_empty())
}

/// Normalize a raw contact entry. Missing CRM-side fields get defaults;
/// entries with no identifying field return `None`.
pub fn normalize_contact(raw: &Value) -> Option<Contact> {
    let id = contact_id(raw)?;
    let phone = contact_phone(raw).unwrap_or_else(|| digits_only(&id));
    let display_name = probe_str(raw, &["name", "pushname", "displayName", "verifiedName"])
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| phone.clone());
    Some(Contact {
        id,
        display_name,
        phone,
        email: probe_str(raw, &["email"]).unwrap_or_default().to_string(),
        notes: probe_str(raw, &["notes"]).unwrap_or_default().to_string(),
        tags: Vec::new(),
        payment_method: default_payment_method(),
        source: probe_str(raw, &["source"])
            .map(str::to_string)
            .unwrap_or_else(default_source),
    })
}

fn message_id(raw: &Value) -> String {
    probe(raw, &["id"])
        .and_then(id_string)
        .or_else(|| raw.get("key").and_then(|k| k.get("id")).and_then(id_string))
        .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()))
}

fn message_content(raw: &Value) -> String {
    if let Some(body) = probe_str(raw, &["body"]) {
        return body.to_string();
    }
    if let Some(msg) = raw.get("message") {
        if let Some(s) = msg.get("conversation").and_then(|v| v.as_str()) {
            return s.to_string();
        }
        if let Some(s) = msg
            .get("extendedTextMessage")
            .and_then(|e| e.get("text"))
            .and_then(|v| v.as_str())
        {
            return s.to_string();
        }
    }
    probe_str(raw, &["content"]).unwrap_or_default().to_string()
}

fn message_direction(raw: &Value) -> Direction {
    match raw.get("fromMe").and_then(|v| v.as_bool()) {
        Some(true) => Direction::Outgoing,
        Some(false) => Direction::Incoming,
        // Older shapes have no fromMe; fall back to the direction string,
        // defaulting to incoming.
        None => match probe_str(raw, &["direction"]) {
            Some("outgoing") => Direction::Outgoing,
            _ => Direction::Incoming,
        },
    }
}

fn message_timestamp(raw: &Value, fallback_now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = probe(raw, &["timestamp", "messageTimestamp"]).and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
    });
    match secs {
        // Gateway timestamps are Unix seconds.
        Some(s) => Utc
            .timestamp_millis_opt((s * 1000.0) as i64)
            .single()
            .unwrap_or(fallback_now),
        // Fabricated ordering information, kept for compatibility: without a
        // wire timestamp the normalization instant stands in for send time.
        None => fallback_now,
    }
}

/// Normalize one raw message for `contact_id`. Never fails: every missing or
/// malformed field degrades to a default, so one bad entry cannot drop the
/// rest of the page. `fallback_now` is used when the payload has no timestamp.
pub fn normalize_message(raw: &Value, contact_id: &str, fallback_now: DateTime<Utc>) -> ChatMessage {
    let media_url = probe_str(raw, &["mediaUrl"]).map(str::to_string);
    let is_text = raw
        .get("type")
        .and_then(|v| v.as_str())
        .map(|t| t == "chat" || t == "text")
        .unwrap_or(true);
    ChatMessage {
        id: message_id(raw),
        contact_id: contact_id.to_string(),
        // Non-text payloads carry the media reference instead of a body.
        content: if is_text { message_content(raw) } else { String::new() },
        media_url,
        direction: message_direction(raw),
        timestamp: message_timestamp(raw, fallback_now),
        delivery_status: probe_str(raw, &["status"])
            .and_then(DeliveryStatus::parse)
            .unwrap_or_default(),
    }
}

/// Pull the entry list out of a response body: first-present of the given
/// keyed fields, or the body itself when it is a bare array.
pub fn entry_array(body: &Value, fields: &[&str]) -> Vec<Value> {
    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    fields
        .iter()
        .find_map(|f| body.get(f).and_then(|v| v.as_array()))
        .cloned()
        .unwrap_or_default()
}

/// Session state string from the varying shapes the gateway nests it in.
pub fn extract_state(body: &Value) -> Option<&str> {
    body.get("instance")
        .and_then(|i| i.get("state"))
        .or_else(|| body.get("state"))
        .or_else(|| body.get("data").and_then(|d| d.get("state")))
        .or_else(|| {
            body.get("data")
                .and_then(|d| d.get("instance"))
                .and_then(|i| i.get("state"))
        })
        .and_then(|v| v.as_str())
}

/// QR payload from a pairing or state response: `qrcode` (string or
/// `{base64}` object), `base64`, or `code`.
pub fn extract_qr(body: &Value) -> Option<String> {
    let qr = body.get("qrcode");
    if let Some(s) = qr.and_then(|v| v.as_str()) {
        return Some(s.to_string());
    }
    if let Some(s) = qr.and_then(|q| q.get("base64")).and_then(|v| v.as_str()) {
        return Some(s.to_string());
    }
    probe_str(body, &["base64", "code"]).map(str::to_string)
}

/// Wrap a base64 QR image payload as a `data:image/png;base64,...` URI so the
/// UI can render it directly. Already-wrapped values and non-base64 pairing
/// codes pass through unchanged.
pub fn qr_data_uri(qr: &str) -> String {
    if qr.starts_with("data:") {
        return qr.to_string();
    }
    if base64::engine::general_purpose::STANDARD.decode(qr).is_ok() {
        return format!("data:image/png;base64,{}", qr);
    }
    qr.to_string()
}
