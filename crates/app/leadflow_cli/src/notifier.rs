use leadflow_core::notify::{Notification, NotificationKind, Notifier};

/// Prints successes to stdout and logs failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => println!("{}", notification.message),
            NotificationKind::Error => log::warn!("{}", notification.message),
        }
    }
}
