//! Request lifecycle engine for relaybridge.
//!
//! A [`Bridge`] owns one view of the shared request store. It turns a call into
//! a persisted [`RequestRecord`], submits it to the relay, polls for the answer
//! and drives the record to `SUCCESS` or `ERROR`. Identical calls collapse into
//! one record, and unfinished records are picked up again after a restart.
//!
//! Several bridges may share a store. Each one keeps an in-memory copy that is
//! refreshed from the store's change feed and on a fixed interval.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use relaybridge_config::BridgeSettings;
use relaybridge_relay::{ClientOptions, RelayClient};
pub use relaybridge_store::KeyValueStore;
use relaybridge_store::{RecordMap, RecordStore};
pub use relaybridge_types::{
    CallData, Fingerprint, RemoteRequestId, RequestEvent, RequestId, RequestRecord,
    RequestStatus, RpcMethod, SyftUrl,
};
use relaybridge_types::Fingerprinter;

mod dedup;
mod error;
mod observers;
mod protocol;
mod sync;

pub use dedup::find_duplicate;
pub use error::BridgeError;
pub use observers::{Observer, SubscriptionId};
pub use protocol::PollOptions;

use observers::Observers;

/// Handle to a request bridge. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    settings: BridgeSettings,
    relay: RelayClient,
    store: RecordStore,
    fingerprinter: Box<dyn Fingerprinter>,
    records: Mutex<RecordMap>,
    /// Bumped whenever `records` changes.
    revision: watch::Sender<u64>,
    observers: Observers,
    /// Records this bridge is submitting or polling right now, with the number
    /// of tasks doing so.
    driving: Mutex<HashMap<RequestId, usize>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .sync_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Bridge {
    /// Builds a bridge and loads the current store contents.
    ///
    /// No background work is started; see [`Bridge::open`].
    pub fn new(
        settings: BridgeSettings,
        surface: Arc<dyn KeyValueStore>,
    ) -> Result<Self, BridgeError> {
        settings.validate()?;
        let relay = RelayClient::new(
            settings.server_url.clone(),
            ClientOptions {
                connect_timeout: settings.connect_timeout,
                request_timeout: settings.request_timeout,
            },
        )
        .map_err(BridgeError::Client)?;
        Ok(Self::with_relay(settings, surface, relay))
    }

    /// Like [`Bridge::new`] with a caller-supplied relay client.
    pub fn with_relay(
        settings: BridgeSettings,
        surface: Arc<dyn KeyValueStore>,
        relay: RelayClient,
    ) -> Self {
        let store = RecordStore::new(surface, settings.store_key.clone());
        let records = store.read_all();
        tracing::debug!(
            key = store.key(),
            count = records.len(),
            "Loaded request records"
        );
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                fingerprinter: settings.fingerprint.fingerprinter(),
                settings,
                relay,
                store,
                records: Mutex::new(records),
                revision,
                observers: Observers::default(),
                driving: Mutex::new(HashMap::new()),
                sync_task: Mutex::new(None),
            }),
        }
    }

    /// Builds a bridge, starts store sync and resumes unfinished requests
    /// when `auto_resume` is set.
    pub async fn open(
        settings: BridgeSettings,
        surface: Arc<dyn KeyValueStore>,
    ) -> Result<Self, BridgeError> {
        let bridge = Self::new(settings, surface)?;
        bridge.start();
        Ok(bridge)
    }

    /// Starts background sync and auto-resume. Must run inside a Tokio runtime.
    /// Calling it again is a no-op.
    pub fn start(&self) {
        {
            let mut task = self
                .inner
                .sync_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if task.is_some() {
                return;
            }
            *task = Some(self.spawn_sync_loop());
        }
        if self.inner.settings.auto_resume {
            self.spawn_auto_resume();
        }
    }

    /// Stops background sync. In-flight requests keep running.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .inner
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    /// Builds call data for `url`, stamped with the configured originator.
    pub fn call_data(&self, url: &str) -> Result<CallData, BridgeError> {
        let url = SyftUrl::parse(url)?;
        CallData::new(url, self.inner.settings.from.clone()).map_err(BridgeError::from)
    }

    #[must_use]
    pub fn fingerprint(&self, call: &CallData) -> Fingerprint {
        self.inner.fingerprinter.fingerprint(call)
    }

    /// Record a new call would collapse into, if any. Always `None` when
    /// deduplication is disabled.
    #[must_use]
    pub fn find_duplicate(&self, fingerprint: &Fingerprint) -> Option<RequestRecord> {
        if !self.inner.settings.dedup_enabled {
            return None;
        }
        self.reload();
        let records = self.lock_records();
        find_duplicate(
            records.values(),
            fingerprint,
            self.inner.settings.dedup_window,
            Utc::now(),
        )
        .cloned()
    }

    /// Fresh copy of one record.
    #[must_use]
    pub fn get(&self, id: &RequestId) -> Option<RequestRecord> {
        self.reload();
        self.lock_records().get(id).cloned()
    }

    /// All records, most recently updated first.
    #[must_use]
    pub fn list(&self) -> Vec<RequestRecord> {
        self.reload();
        let mut records: Vec<RequestRecord> = self.lock_records().values().cloned().collect();
        records.sort_by(|a, b| b.last_updated().cmp(&a.last_updated()));
        records
    }

    /// Removes one record from the store. Returns whether it existed.
    ///
    /// A poll loop still driving the record will write it back on its next step.
    pub fn clear(&self, id: &RequestId) -> bool {
        let mut records = self.inner.store.read_all();
        let removed = records.remove(id).is_some();
        if removed && let Err(e) = self.inner.store.write_all(&records) {
            tracing::warn!(request_id = %id, "Failed to persist cleared request: {e}");
        }
        self.replace_records(records);
        removed
    }

    /// Removes every record from the store. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let removed = self.inner.store.read_all().len();
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!(key = self.inner.store.key(), "Failed to clear request store: {e}");
        }
        self.replace_records(RecordMap::new());
        removed
    }

    /// Registers a lifecycle observer.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(RequestEvent, &RequestRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Re-reads the store into the in-memory view.
    pub fn reload(&self) {
        let records = self.inner.store.read_all();
        self.replace_records(records);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, RecordMap> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_records(&self, records: RecordMap) {
        let changed = {
            let mut current = self.lock_records();
            let changed = *current != records;
            *current = records;
            changed
        };
        if changed {
            self.inner.revision.send_modify(|revision| *revision += 1);
        }
    }

    /// Writes `record` into the shared store, refreshes the local view and
    /// tells observers about `event`.
    ///
    /// Persistence failures are logged; the request keeps going.
    fn commit(&self, record: &RequestRecord, event: Option<RequestEvent>) {
        let mut records = self.inner.store.read_all();
        records.insert(record.id().clone(), record.clone());
        if let Err(e) = self.inner.store.write_all(&records) {
            tracing::warn!(request_id = %record.id(), "Failed to persist request: {e}");
        }
        self.replace_records(records);
        if let Some(event) = event {
            self.inner.observers.notify(event, record);
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("server_url", &self.inner.settings.server_url.as_str())
            .field("store", &self.inner.store)
            .field("observers", &self.inner.observers)
            .finish_non_exhaustive()
    }
}

/// Value a finished record resolves to.
fn settle(record: &RequestRecord) -> Option<Result<Value, BridgeError>> {
    match record.status() {
        RequestStatus::Success => Some(Ok(record.result().cloned().unwrap_or(Value::Null))),
        RequestStatus::Error => Some(Err(BridgeError::RequestFailed {
            id: record.id().clone(),
            message: record.failure().unwrap_or_default().to_string(),
        })),
        RequestStatus::Pending | RequestStatus::Polling => None,
    }
}
