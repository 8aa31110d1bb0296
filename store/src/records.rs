//! The request-record view of a [`KeyValueStore`].
//!
//! All records live in one JSON object, `{ "<id>": <record>, ... }`, under a
//! single key. Reads are fail-open: a missing, unreadable or malformed blob is an
//! empty map, and individual records that fail validation are skipped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relaybridge_types::{RequestId, RequestRecord};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::{KeyValueStore, StoreError};

pub const DEFAULT_STORE_KEY: &str = "relaybridge.requests";

pub type RecordMap = BTreeMap<RequestId, RequestRecord>;

#[derive(Clone)]
pub struct RecordStore {
    surface: Arc<dyn KeyValueStore>,
    key: String,
}

impl RecordStore {
    pub fn new(surface: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            surface,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read_all(&self) -> RecordMap {
        let raw = match self.surface.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return RecordMap::new(),
            Err(e) => {
                tracing::warn!(key = %self.key, "Failed to read request store: {e}");
                return RecordMap::new();
            }
        };
        if raw.trim().is_empty() {
            return RecordMap::new();
        }

        let entries: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(key = %self.key, "Ignoring malformed request store: {e}");
                return RecordMap::new();
            }
        };

        let mut records = RecordMap::new();
        for (stored_id, value) in entries {
            match serde_json::from_value::<RequestRecord>(value) {
                Ok(record) => {
                    if record.id().as_str() != stored_id {
                        tracing::warn!(
                            stored_id = %stored_id,
                            request_id = %record.id(),
                            "Request stored under a foreign key; using its own id"
                        );
                    }
                    records.insert(record.id().clone(), record);
                }
                Err(e) => {
                    tracing::warn!(stored_id = %stored_id, "Skipping invalid request record: {e}");
                }
            }
        }
        records
    }

    pub fn write_all(&self, records: &RecordMap) -> Result<(), StoreError> {
        let blob = serde_json::to_string(records)?;
        self.surface.set(&self.key, &blob)
    }

    /// Drops every record by removing the key.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.surface.remove(&self.key)
    }

    /// Change feed of the underlying surface; each item is the key that changed.
    #[must_use]
    pub fn watch(&self) -> Option<broadcast::Receiver<String>> {
        self.surface.watch()
    }
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore").field("key", &self.key).finish()
    }
}
