//! Instance lifecycle: disconnected -> connecting (QR pairing) -> connected.
//!
//! The manager owns the connection state machine, exposes the current status
//! and pending QR code, and runs the periodic status poll. `connect`,
//! `disconnect`, and `check_status` are idempotent reads/writes of the same
//! small state record; overlapping calls resolve last-write-wins.

use crate::gateway::normalize::{extract_qr, extract_state, qr_data_uri};
use crate::gateway::{EndpointResolver, GatewayClient, GatewayError, Operation, OperationParams};
use crate::model::ConnectionStatus;
use crate::notify::{Notifier, Severity};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reference status poll interval.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// UI-facing connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Pairing QR as a `data:image/png;base64,...` URI; present only while
    /// connecting and a QR payload has been seen.
    pub pending_qr_code: Option<String>,
}

/// Map a gateway session state string (plus QR presence) to our three states.
fn status_from_state(state: Option<&str>, has_qr: bool) -> ConnectionStatus {
    match state {
        Some("open") | Some("connected") => ConnectionStatus::Connected,
        Some("connecting") | Some("pending") => ConnectionStatus::Connecting,
        // A pending QR while not yet open still means pairing is underway.
        _ if has_qr => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Disconnected,
    }
}

pub struct ConnectionManager {
    resolver: EndpointResolver,
    notifier: Arc<dyn Notifier>,
    state: RwLock<ConnectionState>,
    running: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(client: Arc<GatewayClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resolver: EndpointResolver::new(client),
            notifier,
            state: RwLock::new(ConnectionState::default()),
            running: AtomicBool::new(false),
            poll_task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Query the gateway's session state and update `{status, pending_qr_code}`.
    ///
    /// An explicit failed status check flips the indicator to disconnected;
    /// the QR is kept only while connecting with a QR payload present in the
    /// response, and cleared otherwise.
    pub async fn check_status(&self) -> ConnectionState {
        let state = match self
            .resolver
            .resolve(Operation::ConnectionState, &OperationParams::default())
            .await
        {
            Ok(resolved) => {
                let qr = extract_qr(&resolved.body);
                let status = status_from_state(extract_state(&resolved.body), qr.is_some());
                let pending_qr_code = if status == ConnectionStatus::Connecting {
                    qr.map(|q| qr_data_uri(&q))
                } else {
                    None
                };
                ConnectionState {
                    status,
                    pending_qr_code,
                }
            }
            Err(e) => {
                log::warn!("status check failed: {}", e);
                ConnectionState::default()
            }
        };
        self.set_state(state.clone());
        state
    }

    /// Create the instance if needed, then request a pairing QR code.
    ///
    /// Create-instance failures are tolerated (the instance usually already
    /// exists). If the gateway returns a QR, the state becomes connecting and
    /// the QR is exposed for rendering. Some gateway versions complete
    /// pairing silently when a session already existed, so a missing QR is
    /// followed by a status re-check before reporting failure.
    pub async fn connect(&self) -> Result<ConnectionState, GatewayError> {
        let current = self.check_status().await;
        if current.status == ConnectionStatus::Connected {
            self.notifier.notify(Severity::Success, "WhatsApp already connected");
            return Ok(current);
        }

        let config = self.resolver.client().config().snapshot();
        let create_body = json!({
            "instanceName": config.instance_name,
            "token": config.api_key,
            "webhook": null,
        });
        if let Err(e) = self
            .resolver
            .resolve(Operation::CreateInstance, &OperationParams::with_body(create_body))
            .await
        {
            log::warn!("create instance failed (it may already exist): {}", e);
        }

        let qr = match self
            .resolver
            .resolve(Operation::PairingCode, &OperationParams::default())
            .await
        {
            Ok(resolved) => extract_qr(&resolved.body),
            Err(e) => {
                log::warn!("pairing code request failed: {}", e);
                None
            }
        };

        if let Some(qr) = qr {
            let state = ConnectionState {
                status: ConnectionStatus::Connecting,
                pending_qr_code: Some(qr_data_uri(&qr)),
            };
            self.set_state(state.clone());
            self.notifier.notify(Severity::Success, "pairing code ready, scan to connect");
            return Ok(state);
        }

        // No QR came back: the session may have paired silently.
        let rechecked = self.check_status().await;
        if rechecked.status == ConnectionStatus::Connected {
            self.notifier.notify(Severity::Success, "WhatsApp connected");
            return Ok(rechecked);
        }
        self.notifier.notify(Severity::Error, "could not generate pairing code");
        Err(GatewayError::PairingUnavailable)
    }

    /// Log out of the instance. On success the local state is reset
    /// immediately (not on the next poll) so the UI reflects the action
    /// without delay; on failure the state is left unchanged.
    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        match self
            .resolver
            .resolve(Operation::Logout, &OperationParams::default())
            .await
        {
            Ok(_) => {
                self.set_state(ConnectionState::default());
                self.notifier.notify(Severity::Success, "WhatsApp disconnected");
                Ok(())
            }
            Err(e) => {
                self.notifier.notify(Severity::Error, "failed to disconnect WhatsApp");
                Err(e)
            }
        }
    }

    /// Start the background status poll. A failed tick logs and continues;
    /// it never stops subsequent ticks.
    pub fn start_polling(self: Arc<Self>, interval: Duration) {
        self.stop_polling();
        self.running.store(true, Ordering::SeqCst);
        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while manager.running.load(Ordering::SeqCst) {
                manager.check_status().await;
                tokio::time::sleep(interval).await;
            }
        });
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(handle);
    }

    /// Cancel the poll task. Required on teardown so no orphaned requests
    /// outlive the consuming view.
    pub fn stop_polling(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = g.take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
