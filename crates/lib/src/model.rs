//! Internal data model: connection status, contacts, and chat messages.
//!
//! These are the stable shapes the rest of the application sees; raw gateway
//! payloads are converted into them once, at the boundary (`gateway::normalize`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the gateway instance (one paired messaging session).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Whether a message was received from or sent to the contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Gateway-reported delivery state of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    #[default]
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Parse a gateway status string. Unknown strings fall back to the default.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A remote messaging peer, normalized into the CRM's lead-adjacent shape.
///
/// `id` is deterministic for a given gateway payload; entries with no
/// identifying field at all are discarded during normalization rather than
/// surfaced with an empty id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    /// Digits only: country code + number, no symbols.
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    #[serde(default = "default_source")]
    pub source: String,
}

pub(crate) fn default_payment_method() -> String {
    "cash".to_string()
}

pub(crate) fn default_source() -> String {
    "WhatsApp".to_string()
}

/// One chat message, owned by the session tracking `contact_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub contact_id: String,
    /// Text body. Non-text payloads carry an empty body and a `media_url`.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

/// Sort messages ascending by timestamp. The sort is stable, so entries with
/// equal timestamps keep their arrival order.
pub fn sort_by_timestamp(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}
