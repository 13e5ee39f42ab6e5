//! User-visible notifications: toasts on the live screen, plain lines on the
//! console for one-shot commands.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const MAX_TOASTS: usize = 5;
const DEFAULT_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "ok",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub severity: Severity,
    pub message: String,
    pub created: Instant,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.notify(Severity::Info, message);
    }

    fn success(&self, message: &str) {
        self.notify(Severity::Success, message);
    }

    fn warning(&self, message: &str) {
        self.notify(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.notify(Severity::Error, message);
    }
}

/// Bounded toast stack shared between the UI and background work. The
/// oldest toast is dropped once more than five are queued.
#[derive(Debug, Clone)]
pub struct ToastQueue {
    toasts: Arc<Mutex<VecDeque<Toast>>>,
    ttl: Duration,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ToastQueue {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            toasts: Arc::new(Mutex::new(VecDeque::new())),
            ttl,
        }
    }

    pub fn push_at(&self, severity: Severity, message: &str, now: Instant) {
        let mut toasts = self.toasts.lock();
        toasts.push_back(Toast {
            severity,
            message: message.to_owned(),
            created: now,
        });
        while toasts.len() > MAX_TOASTS {
            toasts.pop_front();
        }
    }

    /// Live toasts at `now`, oldest first. Expired ones are dropped.
    pub fn visible_at(&self, now: Instant) -> Vec<Toast> {
        let mut toasts = self.toasts.lock();
        toasts.retain(|toast| now.saturating_duration_since(toast.created) < self.ttl);
        toasts.iter().cloned().collect()
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.visible_at(Instant::now())
    }
}

impl Notifier for ToastQueue {
    fn notify(&self, severity: Severity, message: &str) {
        self.push_at(severity, message, Instant::now());
    }
}

/// Writes notifications to stderr for non-interactive commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info | Severity::Success => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
        eprintln!("[{}] {message}", severity.tag());
    }
}
