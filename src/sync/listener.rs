//! Host callback capability
//!
//! Whichever role receives a notification hands it to a listener. Calls
//! arrive from the sync tasks, possibly concurrently, never from a
//! particular thread.

use std::sync::Arc;

use crate::protocol::Notification;

/// Receives notifications raised by other instances
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, notification: Notification);
}

impl<F> NotificationListener for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn on_notification(&self, notification: Notification) {
        self(notification)
    }
}

/// Shared listener handle held by the server and client roles
pub type SharedListener = Arc<dyn NotificationListener>;

/// Listener that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl NotificationListener for NoopListener {
    fn on_notification(&self, _notification: Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: SharedListener = Arc::new(move |n: Notification| sink.lock().push(n));

        listener.on_notification(Notification::new(NotificationKind::Created, 3));
        NoopListener.on_notification(Notification::new(NotificationKind::Created, 4));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject_id(), 3);
    }
}
