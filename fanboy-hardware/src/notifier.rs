//! Listener registry for channel snapshots
//!
//! The command actor calls [`Notifier::notify`] after each completed poll.
//! Subscribing and unsubscribing may happen from any thread at any time,
//! including from inside a listener while a notification is in progress.

use fanboy_core::Channel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Callback invoked with the full channel snapshot
pub type Listener = dyn Fn(&[Channel]) + Send + Sync;

/// Handle returned by [`Notifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered registry of snapshot listeners
#[derive(Default)]
pub struct Notifier {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<Listener>)>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<Listener>)>> {
        // A panicking listener cannot leave the list half-updated
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a listener; it is called after every completed poll
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[Channel]) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Arc::new(listener)));
        debug!("Listener {:?} subscribed", id);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if removed {
            debug!("Listener {:?} unsubscribed", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners().is_empty()
    }

    /// Deliver `channels` to every listener in registration order
    ///
    /// The list is copied before delivery, so listeners may subscribe or
    /// unsubscribe (themselves included) without affecting this pass.
    pub fn notify(&self, channels: &[Channel]) {
        let listeners: Vec<Arc<Listener>> = self
            .listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(channels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanboy_core::channel_table;
    use std::sync::OnceLock;

    #[test]
    fn test_notify_in_registration_order() {
        let notifier = Notifier::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let calls = calls.clone();
            notifier.subscribe(move |_| calls.lock().unwrap().push(tag));
        }

        notifier.notify(&channel_table(2));
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_listener_receives_snapshot() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        notifier.subscribe(move |channels| {
            sink.lock()
                .unwrap()
                .extend(channels.iter().map(|c| c.id));
        });

        notifier.notify(&channel_table(3));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = Notifier::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = notifier.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notifier.len(), 1);

        notifier.notify(&[]);
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.notify(&[]);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let notifier = Arc::new(Notifier::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first_calls = calls.clone();
        notifier.subscribe(move |_| first_calls.lock().unwrap().push("first"));

        let own_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());
        let self_calls = calls.clone();
        let registry = Arc::downgrade(&notifier);
        let handle = own_id.clone();
        let id = notifier.subscribe(move |_| {
            self_calls.lock().unwrap().push("quitter");
            if let (Some(registry), Some(id)) = (registry.upgrade(), handle.get()) {
                registry.unsubscribe(*id);
            }
        });
        own_id.set(id).unwrap();

        let last_calls = calls.clone();
        notifier.subscribe(move |_| last_calls.lock().unwrap().push("last"));

        notifier.notify(&channel_table(1));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "quitter", "last"]);
        assert_eq!(notifier.len(), 2);

        calls.lock().unwrap().clear();
        notifier.notify(&channel_table(1));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "last"]);
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let notifier = Arc::new(Notifier::new());
        let registry = Arc::downgrade(&notifier);

        notifier.subscribe(move |_| {
            if let Some(registry) = registry.upgrade() {
                registry.subscribe(|_| {});
            }
        });

        notifier.notify(&[]);
        assert_eq!(notifier.len(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let notifier = Notifier::new();
        let a = notifier.subscribe(|_| {});
        let b = notifier.subscribe(|_| {});
        assert_ne!(a, b);
    }
}
