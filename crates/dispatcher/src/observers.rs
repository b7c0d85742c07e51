//! Synchronous observer fan-out on the poll thread.
//!
//! Each observer is invoked in subscription order. A panicking observer is
//! caught and counted; the remaining observers still receive the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use contracts::{ConnectionEvent, ConnectionObserver};
use tracing::{trace, warn};

/// Subscription token returned by [`ObserverList::subscribe`]
pub type ObserverId = u64;

type Entry = (ObserverId, Arc<dyn ConnectionObserver>);

/// Explicit list of notification subscribers
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.len())
            .field("failures", &self.failures())
            .finish()
    }
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(observer = observer.name(), id, "observer subscribed");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Remove a subscription; false if the id is unknown
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(entry_id, _)| *entry_id != id);
        observers.len() != before
    }

    /// Deliver `event` to every observer; returns how many returned normally.
    ///
    /// The list is snapshotted first, so observers may (un)subscribe from
    /// inside `on_event`.
    pub fn notify(&self, event: &ConnectionEvent) -> usize {
        let snapshot: Vec<Entry> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (id, observer) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            match outcome {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        observer = observer.name(),
                        id,
                        kind = event.kind(),
                        "observer panicked while handling notification"
                    );
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observer panics caught so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        kinds: Mutex<Vec<&'static str>>,
    }

    impl ConnectionObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &ConnectionEvent) {
            self.kinds.lock().unwrap().push(event.kind());
        }
    }

    struct Panicker;

    impl ConnectionObserver for Panicker {
        fn on_event(&self, _event: &ConnectionEvent) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_failing_observer_is_isolated() {
        let list = ObserverList::new();
        let recorder = Arc::new(Recorder::default());
        list.subscribe(Arc::new(Panicker));
        list.subscribe(recorder.clone());

        let delivered = list.notify(&ConnectionEvent::Connected);
        assert_eq!(delivered, 1);
        assert_eq!(list.failures(), 1);
        assert_eq!(*recorder.kinds.lock().unwrap(), vec!["connected"]);
    }

    #[test]
    fn test_unsubscribe() {
        let list = ObserverList::new();
        let recorder = Arc::new(Recorder::default());
        let id = list.subscribe(recorder.clone());
        list.notify(&ConnectionEvent::Init);

        assert!(list.unsubscribe(id));
        assert!(!list.unsubscribe(id));
        list.notify(&ConnectionEvent::Connected);

        assert_eq!(*recorder.kinds.lock().unwrap(), vec!["init"]);
        assert!(list.is_empty());
    }
}
