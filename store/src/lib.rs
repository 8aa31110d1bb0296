//! Shared persistence surface for request records.
//!
//! # Architecture
//!
//! ```text
//! RecordStore (readAll / writeAll, one JSON blob under one key)
//!     │
//!     ▼
//! dyn KeyValueStore ── MemoryStore  (in-process, change feed)
//!                   └─ FileStore    (one file per key, atomic replace)
//! ```
//!
//! Several bridges (tabs, processes) may share one surface. Every write replaces
//! the whole blob; there is no compare-and-swap, so the last writer wins.

mod file;
mod memory;
mod records;

use thiserror::Error;
use tokio::sync::broadcast;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use records::{DEFAULT_STORE_KEY, RecordMap, RecordStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A process-external string key-value surface.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Feed of keys written through any handle onto the same surface.
    ///
    /// `None` when the surface cannot detect foreign writes; callers then rely on
    /// periodic re-reads.
    fn watch(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}
