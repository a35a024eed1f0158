//! Chat session for one selected contact: message history, send, and the
//! message poll loop.
//!
//! A session exclusively owns the message list for its contact. Switching
//! contacts means dropping the session (which cancels its poll task) and
//! creating a new one; message lists are never merged across contacts.

use crate::gateway::normalize::{digits_only, entry_array, normalize_message};
use crate::gateway::{EndpointResolver, GatewayClient, GatewayError, Operation, OperationParams};
use crate::model::{sort_by_timestamp, ChatMessage, Contact, DeliveryStatus, Direction};
use crate::notify::{Notifier, Severity};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reference message poll interval.
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(10);

const MESSAGE_PAGE_LIMIT: u32 = 50;

/// Fields the list payload may hide under, tried in order.
const MESSAGE_LIST_FIELDS: &[&str] = &["messages", "data", "conversation", "chats"];

/// UI-facing chat state. `error` distinguishes "fetch failed" from
/// "no messages": on failure the previous list is kept and the flag is set.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct ChatSession {
    resolver: EndpointResolver,
    notifier: Arc<dyn Notifier>,
    contact_id: String,
    /// Digits-only phone key used on the wire.
    phone: String,
    state: RwLock<ChatState>,
    running: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    pub fn new(client: Arc<GatewayClient>, notifier: Arc<dyn Notifier>, contact: &Contact) -> Self {
        Self {
            resolver: EndpointResolver::new(client),
            notifier,
            contact_id: contact.id.clone(),
            phone: digits_only(&contact.phone),
            state: RwLock::new(ChatState::default()),
            running: AtomicBool::new(false),
            poll_task: Mutex::new(None),
        }
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_state(&self, f: impl FnOnce(&mut ChatState)) {
        let mut g = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut g);
    }

    /// Fetch and replace the message history for this contact, sorted
    /// ascending by timestamp. Concurrent invocations (poll tick vs manual
    /// refresh) are not serialized; the last one to complete wins.
    pub async fn load_messages(&self) {
        self.with_state(|s| s.loading = true);
        let mut params = OperationParams::with_phone(self.phone.clone());
        params.limit = Some(MESSAGE_PAGE_LIMIT);
        match self.resolver.resolve(Operation::ListMessages, &params).await {
            Ok(resolved) => {
                let now = Utc::now();
                let mut messages: Vec<ChatMessage> = entry_array(&resolved.body, MESSAGE_LIST_FIELDS)
                    .iter()
                    .map(|raw| normalize_message(raw, &self.contact_id, now))
                    .collect();
                sort_by_timestamp(&mut messages);
                log::debug!(
                    "loaded {} messages for {} via {}",
                    messages.len(),
                    self.contact_id,
                    resolved.endpoint
                );
                self.with_state(|s| {
                    s.messages = messages;
                    s.error = None;
                    s.loading = false;
                });
            }
            Err(e) => {
                // Keep the previous list; a transient failure must not blank the UI.
                log::warn!("failed to fetch messages for {}: {}", self.contact_id, e);
                self.notifier.notify(Severity::Error, "failed to fetch messages");
                self.with_state(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }

    /// Send a text message. Whitespace-only content is rejected locally
    /// without a network call. On gateway confirmation (a `key.id` in the
    /// response) an outgoing message is appended optimistically with
    /// timestamp now; the next poll reconciles with the gateway.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, GatewayError> {
        if content.trim().is_empty() {
            return Err(GatewayError::Validation("message content is empty".to_string()));
        }

        let body = json!({
            "number": self.phone,
            "body": content,
            "options": { "delay": 1200, "presence": "composing" },
        });
        let mut params = OperationParams::with_body(body);
        params.phone = Some(self.phone.clone());

        match self.resolver.resolve(Operation::SendMessage, &params).await {
            Ok(resolved) => {
                let id = resolved
                    .body
                    .get("key")
                    .and_then(|k| k.get("id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));
                let message = ChatMessage {
                    id,
                    contact_id: self.contact_id.clone(),
                    content: content.to_string(),
                    media_url: None,
                    direction: Direction::Outgoing,
                    timestamp: Utc::now(),
                    delivery_status: DeliveryStatus::Sent,
                };
                self.with_state(|s| {
                    s.messages.push(message.clone());
                    s.error = None;
                });
                self.notifier.notify(Severity::Success, "message sent");
                Ok(message)
            }
            Err(e) => {
                self.notifier.notify(Severity::Error, "failed to send message");
                self.with_state(|s| s.error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start the background message poll for this contact.
    pub fn start_polling(self: Arc<Self>, interval: Duration) {
        self.stop_polling();
        self.running.store(true, Ordering::SeqCst);
        let session = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while session.running.load(Ordering::SeqCst) {
                session.load_messages().await;
                tokio::time::sleep(interval).await;
            }
        });
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(handle);
    }

    /// Cancel the poll task; called on contact switch and teardown.
    pub fn stop_polling(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = g.take() {
            handle.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GatewayConfig};
    use crate::notify::BufferNotifier;

    fn offline_session() -> ChatSession {
        // Port 9 (discard) is never listening; validation must reject before
        // any request is attempted, so the test stays fast and offline.
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..GatewayConfig::default()
        };
        let client = Arc::new(GatewayClient::new(ConfigStore::new(config)));
        let contact = Contact {
            id: "5511999990000".to_string(),
            display_name: "Test".to_string(),
            phone: "5511999990000".to_string(),
            email: String::new(),
            notes: String::new(),
            tags: Vec::new(),
            payment_method: "cash".to_string(),
            source: "WhatsApp".to_string(),
        };
        ChatSession::new(client, Arc::new(BufferNotifier::new()), &contact)
    }

    #[tokio::test]
    async fn whitespace_only_content_is_rejected_locally() {
        let session = offline_session();
        for content in ["", "   ", "\n\t "] {
            let err = session.send_message(content).await.expect_err("must reject");
            assert!(err.is_validation(), "got {:?}", err);
        }
        assert!(session.snapshot().messages.is_empty());
        assert!(session.snapshot().error.is_none());
    }

    #[test]
    fn phone_is_normalized_to_digits() {
        let session = offline_session();
        assert_eq!(session.phone, "5511999990000");
    }
}
