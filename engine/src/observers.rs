//! Lifecycle callbacks.
//!
//! Observers run synchronously on the task that produced the event, in
//! registration order. A failing or panicking observer is logged and skipped;
//! it never affects the request or the other observers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use relaybridge_types::{RequestEvent, RequestRecord};

/// Callback invoked with each lifecycle event and the record after the change.
pub type Observer = dyn Fn(RequestEvent, &RequestRecord) -> anyhow::Result<()> + Send + Sync;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Arc<Observer>)>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, observer: Arc<Observer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns whether the subscription existed.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn notify(&self, event: RequestEvent, record: &RequestRecord) {
        // Snapshot so observers may (un)subscribe from inside a callback.
        let snapshot: Vec<Arc<Observer>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer(event, record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    request_id = %record.id(),
                    event = event.as_str(),
                    "Observer failed: {e:#}"
                ),
                Err(_) => tracing::warn!(
                    request_id = %record.id(),
                    event = event.as_str(),
                    "Observer panicked"
                ),
            }
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}
