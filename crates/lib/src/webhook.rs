//! Webhook receiver: optional push ingestion path.
//!
//! The gateway can POST events (`messages.upsert`, `status.instance`) to a
//! registered URL instead of being polled. This receiver listens on a local
//! port, normalizes event payloads, and exposes them over a channel. Polling
//! remains the primary synchronization path; this is an alternative feed for
//! embeddings that want lower latency.

use crate::gateway::normalize::{digits_only, normalize_message};
use crate::gateway::{EndpointResolver, GatewayError, Operation, OperationParams};
use crate::model::ChatMessage;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event pushed by the gateway, normalized at the boundary.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// A new or updated message (`messages.upsert`).
    Message(ChatMessage),
    /// Raw instance state string (`status.instance`); consumers map it the
    /// same way the connection manager maps poll responses.
    InstanceState(String),
}

/// Register this receiver's URL with the gateway.
pub async fn register_webhook(resolver: &EndpointResolver, url: &str) -> Result<(), GatewayError> {
    let body = json!({
        "url": url,
        "events": ["messages.upsert", "status.instance"],
    });
    resolver
        .resolve(Operation::RegisterWebhook, &OperationParams::with_body(body))
        .await?;
    Ok(())
}

/// Running webhook HTTP listener. Aborting/stopping it closes the event
/// channel.
pub struct WebhookReceiver {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl WebhookReceiver {
    /// Bind the listener (port 0 picks a free port) and start serving.
    /// Returns the receiver handle and the event stream.
    pub async fn start(
        bind: &str,
        port: u16,
    ) -> anyhow::Result<(Self, mpsc::Receiver<WebhookEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let app = Router::new().route("/", post(handle_event)).with_state(tx);
        let listener = tokio::net::TcpListener::bind((bind, port)).await?;
        let addr = listener.local_addr()?;
        log::info!("webhook receiver listening on {}", addr);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::warn!("webhook receiver stopped: {}", e);
            }
        });
        Ok((Self { addr, task }, rx))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for WebhookReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_event(
    State(tx): State<mpsc::Sender<WebhookEvent>>,
    Json(body): Json<Value>,
) -> StatusCode {
    for event in parse_events(&body) {
        if tx.send(event).await.is_err() {
            log::debug!("webhook event channel closed, dropping event");
            return StatusCode::OK;
        }
    }
    StatusCode::OK
}

/// Normalize a webhook POST body into zero or more events. Unknown or
/// malformed events are dropped, never an error back to the gateway.
fn parse_events(body: &Value) -> Vec<WebhookEvent> {
    let event = body.get("event").and_then(|v| v.as_str()).unwrap_or_default();
    match event {
        "messages.upsert" => {
            let entries: Vec<&Value> = match body.get("data") {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(data @ Value::Object(_)) => vec![data],
                _ => Vec::new(),
            };
            let now = Utc::now();
            entries
                .into_iter()
                .filter_map(|raw| {
                    let contact_id = remote_contact_id(raw)?;
                    Some(WebhookEvent::Message(normalize_message(raw, &contact_id, now)))
                })
                .collect()
        }
        "status.instance" => body
            .get("data")
            .and_then(|d| d.get("state").or_else(|| d.get("status")))
            .and_then(|v| v.as_str())
            .map(|s| vec![WebhookEvent::InstanceState(s.to_string())])
            .unwrap_or_default(),
        _ => {
            log::debug!("ignoring webhook event {:?}", event);
            Vec::new()
        }
    }
}

/// Owning contact for a pushed message: digits of the remote JID. Messages
/// with no addressable peer are dropped, matching contact normalization.
fn remote_contact_id(raw: &Value) -> Option<String> {
    let jid = raw
        .get("key")
        .and_then(|k| k.get("remoteJid"))
        .or_else(|| raw.get("remoteJid"))
        .or_else(|| raw.get("from"))
        .and_then(|v| v.as_str())?;
    let digits = digits_only(jid);
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}
