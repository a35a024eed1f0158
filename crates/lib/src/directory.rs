//! Contact directory: periodic refresh of the full contact/chat list.

use crate::gateway::normalize::{entry_array, normalize_contact};
use crate::gateway::{EndpointResolver, GatewayClient, Operation, OperationParams};
use crate::model::Contact;
use crate::notify::{Notifier, Severity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reference directory poll interval.
pub const DIRECTORY_POLL_INTERVAL: Duration = Duration::from_secs(30);

const CONTACT_LIST_FIELDS: &[&str] = &["contacts", "data", "chats"];

/// UI-facing directory state. `error` distinguishes "fetch failed" from
/// "zero contacts".
#[derive(Debug, Clone, Default)]
pub struct DirectoryState {
    pub contacts: Vec<Contact>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct ContactDirectory {
    resolver: EndpointResolver,
    notifier: Arc<dyn Notifier>,
    state: RwLock<DirectoryState>,
    running: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ContactDirectory {
    pub fn new(client: Arc<GatewayClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            resolver: EndpointResolver::new(client),
            notifier,
            state: RwLock::new(DirectoryState::default()),
            running: AtomicBool::new(false),
            poll_task: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> DirectoryState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_state(&self, f: impl FnOnce(&mut DirectoryState)) {
        let mut g = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut g);
    }

    /// Fetch and replace the exposed contact set. Each entry is normalized
    /// independently; entries with no identifying field are discarded.
    pub async fn load_contacts(&self) {
        self.with_state(|s| s.loading = true);
        match self
            .resolver
            .resolve(Operation::ListContacts, &OperationParams::default())
            .await
        {
            Ok(resolved) => {
                let contacts: Vec<Contact> = entry_array(&resolved.body, CONTACT_LIST_FIELDS)
                    .iter()
                    .filter_map(normalize_contact)
                    .collect();
                log::debug!("loaded {} contacts via {}", contacts.len(), resolved.endpoint);
                self.with_state(|s| {
                    s.contacts = contacts;
                    s.error = None;
                    s.loading = false;
                });
            }
            Err(e) => {
                log::warn!("failed to fetch contacts: {}", e);
                self.notifier.notify(Severity::Error, "failed to fetch contacts");
                self.with_state(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }

    /// Start the background directory poll.
    pub fn start_polling(self: Arc<Self>, interval: Duration) {
        self.stop_polling();
        self.running.store(true, Ordering::SeqCst);
        let directory = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while directory.running.load(Ordering::SeqCst) {
                directory.load_contacts().await;
                tokio::time::sleep(interval).await;
            }
        });
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(handle);
    }

    /// Cancel the poll task on teardown.
    pub fn stop_polling(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut g = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = g.take() {
            handle.abort();
        }
    }
}

impl Drop for ContactDirectory {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
