use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Cleanup returned by a [`StartStopNotifier`], run when the last subscriber leaves.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Called with a [`Setter`] when a store gains its first subscriber.
///
/// The returned [`Teardown`], if any, runs when the subscriber count drops
/// back to zero. The notifier runs again on the next 0 -> 1 transition.
pub type StartStopNotifier<T> = Box<dyn Fn(Setter<T>) -> Option<Teardown> + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<(usize, Subscriber<T>)>>,
    next_id: AtomicUsize,
    notifier: Option<StartStopNotifier<T>>,
    // Set while the notifier runs; writes made then are stored, not delivered.
    starting: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl<T: Clone> Inner<T> {
    fn get(&self) -> T {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, new_value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = new_value;
        self.notify();
    }

    /// Deliver the current value to a snapshot of the subscribers.
    ///
    /// No lock is held while callbacks run, so a callback may write back
    /// into the store.
    fn notify(&self) {
        if self.starting.load(Ordering::SeqCst) {
            return;
        }
        let value = self.get();
        let subscribers: Vec<Subscriber<T>> = lock(&self.subscribers)
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(&value);
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let teardown = self
            .teardown
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

impl<T: Send + Sync> Unsubscribe for Inner<T> {
    fn unsubscribe(&self, id: usize) {
        let teardown = {
            let mut subscribers = lock(&self.subscribers);
            let before = subscribers.len();
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            if subscribers.len() < before && subscribers.is_empty() {
                lock(&self.teardown).take()
            } else {
                None
            }
        };
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

/// A writable reactive value container.
///
/// Subscribers are called immediately with the current value and then
/// synchronously on every `set`/`update`. An optional [`StartStopNotifier`]
/// runs while the store has at least one subscriber.
pub struct Writable<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Writable<T> {
    /// Create a new store with the given initial value.
    pub fn new(initial: T) -> Self {
        Self::build(initial, None)
    }

    /// Create a store whose `notifier` starts on the first subscriber.
    pub fn with_notifier(initial: T, notifier: StartStopNotifier<T>) -> Self {
        Self::build(initial, Some(notifier))
    }

    fn build(initial: T, notifier: Option<StartStopNotifier<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(0),
                notifier,
                starting: AtomicBool::new(false),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Set a new value and notify every subscriber before returning.
    pub fn set(&self, new_value: T) {
        self.inner.set(new_value);
    }

    /// Replace the value with `f` applied to the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.get());
        self.set(new_value);
    }

    /// Subscribe to value changes.
    ///
    /// The callback runs once with the current value before this returns.
    /// Values the notifier sets while starting are folded into that first
    /// delivery. It stays registered until the returned [`Subscription`] is dropped
    /// or explicitly unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Subscriber<T> = Arc::new(callback);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        let first = {
            let mut subscribers = lock(&self.inner.subscribers);
            subscribers.push((id, Arc::clone(&callback)));
            subscribers.len() == 1
        };

        if first {
            if let Some(notifier) = &self.inner.notifier {
                self.inner.starting.store(true, Ordering::SeqCst);
                let teardown = notifier(self.setter());
                self.inner.starting.store(false, Ordering::SeqCst);
                *lock(&self.inner.teardown) = teardown;
            }
        }

        callback(&self.get());

        let owner: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription {
            id,
            owner: Some(owner),
        }
    }

    /// A handle that writes into this store without keeping it alive.
    pub fn setter(&self) -> Setter<T> {
        Setter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Weak write handle passed to a [`StartStopNotifier`].
pub struct Setter<T> {
    inner: Weak<Inner<T>>,
}

impl<T: Clone> Setter<T> {
    /// Set the store's value. Does nothing once the store is gone.
    pub fn set(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.set(value);
        }
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// RAII guard for a store subscription.
pub struct Subscription {
    id: usize,
    owner: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    /// Stop receiving values. Same as dropping the guard.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(owner) = self.owner.take().and_then(|owner| owner.upgrade()) {
            owner.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct AppState {
        count: usize,
        name: String,
    }

    #[test]
    fn writable_get_set() {
        let store = Writable::new(AppState {
            count: 0,
            name: "test".to_string(),
        });

        assert_eq!(store.get().count, 0);

        store.set(AppState {
            count: 42,
            name: "updated".to_string(),
        });

        assert_eq!(store.get().count, 42);
        assert_eq!(store.get().name, "updated");
    }

    #[test]
    fn writable_update() {
        let store = Writable::new(AppState {
            count: 0,
            name: "test".to_string(),
        });

        store.update(|state| AppState {
            count: state.count + 10,
            ..state.clone()
        });

        assert_eq!(store.get().count, 10);
        assert_eq!(store.get().name, "test");
    }

    #[test]
    fn subscribe_delivers_current_value_then_changes() {
        let store = Writable::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = store.subscribe(move |value| seen_clone.lock().unwrap().push(*value));
        store.set(2);
        store.update(|n| n * 10);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 20]);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let store = Writable::new(0);
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let sub = store.subscribe(move |_| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        store.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        drop(sub);
        store.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn notifier_runs_on_first_and_tears_down_on_last() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (starts_clone, stops_clone) = (starts.clone(), stops.clone());

        let store = Writable::with_notifier(
            0,
            Box::new(move |_setter: Setter<i32>| {
                starts_clone.fetch_add(1, Ordering::SeqCst);
                let stops = stops_clone.clone();
                Some(Box::new(move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                }) as Teardown)
            }),
        );

        let a = store.subscribe(|_| {});
        let b = store.subscribe(|_| {});
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        a.unsubscribe();
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        b.unsubscribe();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let _c = store.subscribe(|_| {});
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notifier_setter_writes_before_first_delivery() {
        let store = Writable::with_notifier(
            0,
            Box::new(|setter: Setter<i32>| {
                setter.set(7);
                None
            }),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.subscribe(move |value| seen_clone.lock().unwrap().push(*value));

        assert_eq!(store.get(), 7);
        assert_eq!(*seen.lock().unwrap(), vec![7]);

        store.set(8);
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn dropping_store_runs_pending_teardown() {
        let stops = Arc::new(AtomicUsize::new(0));
        let stops_clone = stops.clone();
        let store = Writable::with_notifier(
            0,
            Box::new(move |_setter: Setter<i32>| {
                let stops = stops_clone.clone();
                Some(Box::new(move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                }) as Teardown)
            }),
        );

        let sub = store.subscribe(|_| {});
        drop(store);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        drop(sub);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_write_back_into_store() {
        let store = Writable::new(0);
        let store_clone = store.clone();

        let _sub = store.subscribe(move |value| {
            if *value == 1 {
                store_clone.set(2);
            }
        });
        store.set(1);

        assert_eq!(store.get(), 2);
    }
}
