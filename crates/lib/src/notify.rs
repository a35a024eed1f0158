//! Fire-and-forget user notification sink.
//!
//! The managers report connect/disconnect/send/fetch outcomes here; a UI
//! embedding renders them as toasts, the CLI logs them. Callers never block
//! on or read back a notification's result.

use std::sync::Mutex;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

pub trait Notifier: Send + Sync {
    /// Report an outcome to the user. Must not block.
    fn notify(&self, severity: Severity, message: &str);
}

/// Notifier that writes to the log (CLI default).
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Success => log::info!("{}", message),
            Severity::Error => log::error!("{}", message),
        }
    }
}

/// Notifier that buffers messages in memory (tests, headless embedding).
#[derive(Default)]
pub struct BufferNotifier {
    inner: Mutex<Vec<(Severity, String)>>,
}

impl BufferNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all buffered notifications, oldest first.
    pub fn drain(&self) -> Vec<(Severity, String)> {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *g)
    }
}

impl Notifier for BufferNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.push((severity, message.to_string()));
    }
}
