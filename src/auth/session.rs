// Session-invalid notification with a single subscriber slot

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives the signal that the current session is no longer valid
pub trait SessionObserver: Send + Sync {
    fn on_session_invalid(&self);
}

impl<F> SessionObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_invalid(&self) {
        self()
    }
}

/// Marker sent through [`ChannelObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInvalidated;

/// Forwards notifications into a bounded channel the session owner awaits
pub struct ChannelObserver {
    tx: mpsc::Sender<SessionInvalidated>,
}

impl ChannelObserver {
    /// Create an observer and the receiver end the session owner listens on
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionInvalidated>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_session_invalid(&self) {
        // A full channel already carries an unread signal
        if let Err(e) = self.tx.try_send(SessionInvalidated) {
            tracing::debug!("Session-invalid signal not queued: {}", e);
        }
    }
}

/// One-slot observer registry; subscribing replaces the previous observer
#[derive(Default)]
pub struct SessionEvents {
    slot: RwLock<Option<Arc<dyn SessionObserver>>>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        *self.slot.write() = Some(observer);
    }

    pub fn unsubscribe(&self) {
        *self.slot.write() = None;
    }

    pub fn has_subscriber(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Fire the notification
    pub fn notify(&self) {
        // Clone out of the lock so the observer may re-subscribe
        let observer = self.slot.read().clone();
        match observer {
            Some(observer) => observer.on_session_invalid(),
            None => tracing::warn!("Session invalidated with no subscriber registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_without_subscriber_is_noop() {
        let events = SessionEvents::new();
        assert!(!events.has_subscriber());
        events.notify();
    }

    #[test]
    fn test_subscribe_replaces_previous() {
        let events = SessionEvents::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        events.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = second.clone();
        events.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        events.notify();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        events.unsubscribe();
        events.notify();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_observer_delivers() {
        let events = SessionEvents::new();
        let (observer, mut rx) = ChannelObserver::channel(1);
        events.subscribe(Arc::new(observer));

        events.notify();
        // Second signal is dropped while the first is unread
        events.notify();

        assert_eq!(rx.recv().await, Some(SessionInvalidated));
        assert!(rx.try_recv().is_err());
    }
}
