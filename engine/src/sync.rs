//! Keeping the local view current and finishing work other contexts left behind.

use std::sync::Arc;

use futures_util::future::join_all;
use relaybridge_types::{RequestId, RequestRecord};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{Bridge, BridgeError, settle};

enum Wake {
    Tick,
    Changed(String),
    Lagged,
    Closed,
}

impl Bridge {
    /// Waits until the record is terminal and returns its outcome.
    ///
    /// Works for records driven by any bridge on the same store: the local view
    /// is refreshed at least every `refresh_interval` while waiting. A record
    /// whose driver has stopped updating it (a crashed process, a queued
    /// request) is resumed by the waiting bridge.
    pub async fn wait(&self, id: &RequestId) -> Result<Value, BridgeError> {
        let mut revision = self.inner.revision.subscribe();
        loop {
            let record = self
                .get(id)
                .ok_or_else(|| BridgeError::NotFound(id.clone()))?;
            if let Some(outcome) = settle(&record) {
                return outcome;
            }
            if self.is_stalled(&record) {
                tracing::info!(
                    request_id = %record.id(),
                    status = %record.status(),
                    "Taking over stalled request"
                );
                return self.resume_record(record).await;
            }
            tokio::select! {
                _ = revision.changed() => {}
                () = tokio::time::sleep(self.inner.settings.refresh_interval) => {}
            }
        }
    }

    /// Resumes every unfinished record concurrently.
    pub async fn resume_all(&self) -> Vec<(RequestId, Result<Value, BridgeError>)> {
        let pending: Vec<RequestRecord> = self
            .list()
            .into_iter()
            .filter(|record| !record.is_terminal())
            .collect();
        join_all(pending.into_iter().map(|record| async move {
            let id = record.id().clone();
            let outcome = self.resume_record(record).await;
            (id, outcome)
        }))
        .await
    }

    pub(crate) fn spawn_auto_resume(&self) {
        let unfinished: Vec<RequestRecord> = self
            .list()
            .into_iter()
            .filter(|record| !record.is_terminal())
            .collect();
        if unfinished.is_empty() {
            return;
        }
        tracing::info!(count = unfinished.len(), "Resuming unfinished requests");
        for record in unfinished {
            let bridge = self.clone();
            tokio::spawn(async move {
                let id = record.id().clone();
                if let Err(e) = bridge.resume_record(record).await {
                    tracing::warn!(request_id = %id, "Resumed request did not succeed: {e}");
                }
            });
        }
    }

    /// Reloads on store change notifications for our key, and on a fixed
    /// interval for surfaces that cannot report foreign writes.
    ///
    /// Holds only a weak reference; the loop ends once every handle is dropped.
    pub(crate) fn spawn_sync_loop(&self) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let mut feed = self.inner.store.watch();
        let key = self.inner.store.key().to_string();
        let period = self.inner.settings.refresh_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let wake = match feed.as_mut() {
                    Some(changes) => tokio::select! {
                        _ = ticker.tick() => Wake::Tick,
                        change = changes.recv() => match change {
                            Ok(changed) => Wake::Changed(changed),
                            Err(RecvError::Lagged(_)) => Wake::Lagged,
                            Err(RecvError::Closed) => Wake::Closed,
                        },
                    },
                    None => {
                        ticker.tick().await;
                        Wake::Tick
                    }
                };

                let reload = match wake {
                    Wake::Tick | Wake::Lagged => true,
                    Wake::Changed(changed) => changed == key,
                    Wake::Closed => {
                        tracing::debug!(key = %key, "Store change feed closed; polling only");
                        feed = None;
                        false
                    }
                };

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if reload {
                    Bridge { inner }.reload();
                }
            }
        })
    }
}
