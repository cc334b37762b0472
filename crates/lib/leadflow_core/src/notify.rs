//! User-facing notifications.
//!
//! Every user-triggered action reports exactly one success or failure through
//! a [`Notifier`]. How it is shown (toast, terminal line) is up to the
//! implementation.

use tracing::{info, warn};

/// Outcome kind of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

/// A transient, advisory message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn success(&self, message: &str) {
        self.notify(Notification {
            kind: NotificationKind::Success,
            message: message.to_string(),
        });
    }

    fn error(&self, message: &str) {
        self.notify(Notification {
            kind: NotificationKind::Error,
            message: message.to_string(),
        });
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => info!(message = %notification.message, "notification"),
            NotificationKind::Error => warn!(message = %notification.message, "notification"),
        }
    }
}
