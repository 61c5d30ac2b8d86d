//! Named-event publish/subscribe.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// A subscriber callback. Any context the callback needs is captured by the closure.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies a subscription for [`EventEmitter::off`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    event_name: String,
}

impl SubscriptionHandle {
    /// Name of the event this subscription listens to.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

struct Subscription<E> {
    id: u64,
    event_name: String,
    listener: Listener<E>,
}

/// Dispatches events to subscribers registered by event name.
///
/// Multiple subscribers may share an event name. They are invoked in registration order,
/// synchronously, on the thread that calls [`EventEmitter::emit`]. No internal lock is held while
/// a listener runs, so listeners may subscribe or unsubscribe from within a callback.
pub struct EventEmitter<E> {
    subscriptions: Mutex<Vec<Subscription<E>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        EventEmitter {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E> EventEmitter<E> {
    /// Create an emitter with no subscriptions.
    pub fn new() -> Self {
        EventEmitter::default()
    }

    /// Register `listener` for `event_name`.
    pub fn on(
        &self,
        event_name: impl Into<String>,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.on_listener(event_name, Arc::new(listener))
    }

    /// Register a shared listener. The same `Arc` can later be passed to
    /// [`EventEmitter::off_listener`].
    pub fn on_listener(&self, event_name: impl Into<String>, listener: Listener<E>) -> SubscriptionHandle {
        let event_name = event_name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.lock().push(Subscription {
            id,
            event_name: event_name.clone(),
            listener,
        });

        SubscriptionHandle { id, event_name }
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn off(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|it| it.id != handle.id);
        subscriptions.len() != before
    }

    /// Remove every subscription of `listener` to `event_name`. Returns the number removed.
    pub fn off_listener(&self, event_name: &str, listener: &Listener<E>) -> usize {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions
            .retain(|it| !(it.event_name == event_name && Arc::ptr_eq(&it.listener, listener)));
        before - subscriptions.len()
    }

    /// Invoke all listeners of `event_name`. Returns the number of listeners invoked.
    pub fn emit(&self, event_name: &str, event: &E) -> usize {
        let listeners: Vec<Listener<E>> = self
            .lock()
            .iter()
            .filter(|it| it.event_name == event_name)
            .map(|it| it.listener.clone())
            .collect();

        for listener in &listeners {
            listener(event);
        }

        listeners.len()
    }

    /// Whether anyone listens to `event_name`.
    pub fn has_listeners(&self, event_name: &str) -> bool {
        self.lock().iter().any(|it| it.event_name == event_name)
    }

    /// Count subscriptions whose event name matches `predicate`.
    pub fn count_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.lock()
            .iter()
            .filter(|it| predicate(&it.event_name))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription<E>>> {
        self.subscriptions
            .lock()
            .expect("thread holding subscriptions lock should not panic")
    }
}
