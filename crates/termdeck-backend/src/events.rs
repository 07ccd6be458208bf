use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tracing::warn;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Listeners for one event kind of a process.
pub(crate) struct ListenerSet<T> {
    label: &'static str,
    next_id: AtomicU64,
    listeners: StdMutex<Vec<(u64, Listener<T>)>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            next_id: AtomicU64::new(1),
            listeners: StdMutex::new(Vec::new()),
        })
    }

    pub(crate) fn add(self: &Arc<Self>, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        let weak: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        Subscription { id, set: weak }
    }

    /// Calls every listener with `value`. Returns how many listeners panicked.
    pub(crate) fn emit(&self, value: &T) -> usize {
        // Snapshot so listeners may (un)subscribe from inside a callback.
        let snapshot: Vec<Listener<T>> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return 0,
        };
        let mut panicked = 0;
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                panicked += 1;
                warn!(event = "listener_panicked", kind = self.label);
            }
        }
        panicked
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for ListenerSet<T> {
    fn detach(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(existing, _)| *existing != id);
        }
    }
}

/// Handle returned by `on_data`/`on_exit`/`on_error`.
///
/// Dropping the handle keeps the listener attached; call
/// [`Subscription::unsubscribe`] to remove it. All listeners of a process are
/// released once its exit event has been delivered.
pub struct Subscription {
    id: u64,
    set: Weak<dyn Detach>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let set = ListenerSet::<String>::new("data");
        let seen = Arc::new(AtomicUsize::new(0));
        let _boom = set.add(Arc::new(|_: &String| panic!("listener bug")));
        let counter = Arc::clone(&seen);
        let _ok = set.add(Arc::new(move |_: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let panicked = set.emit(&"hello".to_string());
        assert_eq!(panicked, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let set = ListenerSet::<u32>::new("exit");
        let first = set.add(Arc::new(|_: &u32| {}));
        let _second = set.add(Arc::new(|_: &u32| {}));
        assert_eq!(set.len(), 2);

        first.unsubscribe();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unsubscribe_after_set_dropped_is_harmless() {
        let set = ListenerSet::<u32>::new("error");
        let sub = set.add(Arc::new(|_: &u32| {}));
        drop(set);
        sub.unsubscribe();
    }
}
