//! Identity-keyed observer registry.
//!
//! Every piece of state that fans out to several consumers (the app list,
//! per-app update progress, the filtered snapshot) is published through an
//! `ObserverRegistry`. An observer registers one callback under its
//! `ObserverId` and removes it when it stops observing. `Subscription`
//! does the removal on drop so registrations never outlive their owner.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Process-unique token identifying one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Allocate a fresh identity
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Callback stored in a registry
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

type CallbackMap<T> = HashMap<ObserverId, Callback<T>>;

/// Keyed fan-out of values of type `T`.
///
/// Cloning yields another handle to the same registry.
pub struct ObserverRegistry<T> {
    callbacks: Arc<Mutex<CallbackMap<T>>>,
}

impl<T> Clone for ObserverRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: 'static> fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

impl<T: 'static> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CallbackMap<T>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `callback` under `id`, replacing any previous callback for it.
    pub fn add<F>(&self, id: ObserverId, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if self.lock().insert(id, Arc::new(callback)).is_some() {
            tracing::debug!("Replaced callback for {}", id);
        }
    }

    /// Remove the callback for `id`. Absent ids are ignored.
    pub fn remove(&self, id: ObserverId) {
        self.lock().remove(&id);
    }

    /// Register under a fresh id and return a guard that unregisters on drop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.add(id, callback);

        let callbacks: Weak<Mutex<CallbackMap<T>>> = Arc::downgrade(&self.callbacks);
        Subscription::new(id, move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
        })
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `value` to every registered callback on the calling thread.
    ///
    /// Callbacks run against a copy of the registration set, so they may add
    /// or remove observers (themselves included) while being notified. An
    /// observer removed mid-delivery is not called afterwards. A panicking
    /// callback is logged and skipped.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<(ObserverId, Callback<T>)> = self
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        for (id, callback) in callbacks {
            if !self.contains(id) {
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                tracing::warn!("{} panicked during notification, skipping it", id);
            }
        }
    }
}

/// Scoped registration. Dropping it unregisters the observer.
pub struct Subscription {
    id: ObserverId,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: ObserverId, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> ObserverId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &u32| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_observer_ids_are_unique() {
        let a = ObserverId::new();
        let b = ObserverId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_overwrites_existing_callback() {
        let registry = ObserverRegistry::<u32>::new();
        let id = ObserverId::new();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        registry.add(id, first_cb);
        registry.add(id, second_cb);
        registry.notify(&1);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_does_not_affect_other_observers() {
        let registry = ObserverRegistry::<u32>::new();
        let (a_count, a_cb) = counter();
        let (b_count, b_cb) = counter();
        let a = ObserverId::new();
        let b = ObserverId::new();
        registry.add(a, a_cb);
        registry.add(b, b_cb);

        registry.remove(a);
        registry.remove(ObserverId::new());
        registry.notify(&7);

        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_block_delivery() {
        let registry = ObserverRegistry::<u32>::new();
        let (count, cb) = counter();
        registry.add(ObserverId::new(), |_: &u32| panic!("observer failure"));
        registry.add(ObserverId::new(), cb);

        registry.notify(&3);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_remove_itself_during_notify() {
        let registry = ObserverRegistry::<u32>::new();
        let id = ObserverId::new();
        let handle = registry.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);
        registry.add(id, move |_: &u32| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            handle.remove(id);
        });

        registry.notify(&1);
        registry.notify(&2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_unregisters_on_drop() {
        let registry = ObserverRegistry::<u32>::new();
        let (count, cb) = counter();
        let subscription = registry.subscribe(cb);
        assert!(registry.contains(subscription.id()));

        registry.notify(&1);
        drop(subscription);
        registry.notify(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_debug_shows_observer_count() {
        let registry = ObserverRegistry::<String>::new();
        let _subscription = registry.subscribe(|_| {});
        assert_eq!(format!("{:?}", registry), "ObserverRegistry { observers: 1 }");
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let registry = ObserverRegistry::<u32>::new();
        let subscription = registry.subscribe(|_| {});
        drop(registry);
        drop(subscription);
    }
}
