//! Synchronous publish/subscribe signal.
//!
//! A [`Signal`] holds any number of listeners and calls each of them, in
//! subscription order, every time a value is fired. Listeners are detached
//! explicitly through the [`Connection`] returned by [`Signal::connect`] or
//! all at once with [`Signal::disconnect_all`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ListenerList<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// A multi-listener event source.
pub struct Signal<T> {
    listeners: Arc<ListenerList<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. It stays attached until the returned connection
    /// is disconnected or the signal is cleared.
    pub fn connect<F>(&self, listener: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        let weak: Weak<ListenerList<T>> = Arc::downgrade(&self.listeners);
        Connection {
            detach: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Call every listener with `value`.
    ///
    /// The listener list is copied before dispatch, so listeners may connect
    /// or disconnect while being called; such changes apply from the next fire.
    pub fn fire(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(value);
        }
    }

    /// Detach every listener.
    pub fn disconnect_all(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .listeners
            .lock()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("Signal").field("listeners", &count).finish()
    }
}

/// Handle to a single listener registration.
///
/// Dropping a connection leaves the listener attached; call
/// [`Connection::disconnect`] to remove it.
pub struct Connection {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Connection {
    /// Remove the listener from its signal. A no-op if the signal is gone.
    pub fn disconnect(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fire_reaches_every_listener_in_order() {
        let signal: Signal<i32> = Signal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        signal.connect(move |v| first.lock().unwrap().push(("first", *v)));
        let second = Arc::clone(&seen);
        signal.connect(move |v| second.lock().unwrap().push(("second", *v)));

        signal.fire(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let signal: Signal<()> = Signal::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let connection = signal.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.fire(&());
        connection.disconnect();
        signal.fire(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_disconnect_all() {
        let signal: Signal<u8> = Signal::new();
        signal.connect(|_| {});
        signal.connect(|_| {});
        assert_eq!(signal.listener_count(), 2);

        signal.disconnect_all();
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_disconnect_after_signal_dropped() {
        let signal: Signal<u8> = Signal::new();
        let connection = signal.connect(|_| {});
        drop(signal);
        connection.disconnect();
    }
}
