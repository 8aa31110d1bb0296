//! Submit, poll and resume.
//!
//! ```text
//! submit ──▶ dedup hit? ──yes──▶ existing record (ERROR hits fall through)
//!               │no
//!               ▼
//!           PENDING ──POST──▶ 202 + id ──▶ POLLING ──poll loop──▶ SUCCESS
//!               │               other 2xx ──────────────────────▶ SUCCESS
//!               └──── non-2xx / network ─────────────────────────▶ ERROR
//! ```

use std::sync::PoisonError;
use std::time::Duration;

use chrono::Utc;
use relaybridge_relay::{PollOutcome, SubmitOutcome};
use relaybridge_types::{
    CallData, RequestEvent, RequestId, RequestRecord, RequestStatus, TransitionError,
};
use serde_json::Value;

use crate::{Bridge, BridgeError, settle};

enum Admission {
    Existing(RequestRecord),
    Fresh(RequestRecord),
}

/// Marks a record as driven by this bridge until dropped.
struct Driving<'a> {
    bridge: &'a Bridge,
    id: RequestId,
}

impl Drop for Driving<'_> {
    fn drop(&mut self) {
        let mut driving = self
            .bridge
            .inner
            .driving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = driving.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                driving.remove(&self.id);
            }
        }
    }
}

/// Bounds for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub attempt_limit: u32,
    pub interval: Duration,
}

impl Bridge {
    /// Poll bounds from the bridge settings.
    #[must_use]
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            attempt_limit: self.inner.settings.poll_attempts,
            interval: self.inner.settings.poll_interval,
        }
    }

    /// Submits `call` and drives it to a terminal state.
    ///
    /// An identical call inside the dedup window returns the existing record
    /// instead: a `SUCCESS` record as-is, an in-flight one without waiting
    /// (see [`Bridge::wait`]). A duplicate that ended in `ERROR` is ignored and
    /// the call goes out again under a new id.
    pub async fn submit(&self, call: CallData) -> Result<RequestRecord, BridgeError> {
        match self.admit(call) {
            Admission::Existing(record) => Ok(record),
            Admission::Fresh(record) => {
                let _driving = self.drive(record.id());
                self.run_submission(record).await
            }
        }
    }

    /// Records `call` as `PENDING` without touching the network.
    ///
    /// Deduplicates like [`Bridge::submit`]. The request goes out on the next
    /// [`Bridge::resume`] or [`Bridge::resume_all`].
    pub fn enqueue(&self, call: CallData) -> RequestRecord {
        match self.admit(call) {
            Admission::Existing(record) | Admission::Fresh(record) => record,
        }
    }

    fn admit(&self, call: CallData) -> Admission {
        let fingerprint = self.fingerprint(&call);
        if let Some(existing) = self.find_duplicate(&fingerprint) {
            if existing.status() == RequestStatus::Error {
                tracing::debug!(
                    request_id = %existing.id(),
                    "Previous identical request failed; resubmitting"
                );
            } else {
                tracing::debug!(
                    request_id = %existing.id(),
                    status = %existing.status(),
                    "Reusing identical request"
                );
                return Admission::Existing(existing);
            }
        }

        let record = RequestRecord::new(fingerprint, call);
        tracing::info!(request_id = %record.id(), url = %record.call().url(), "New request");
        self.commit(&record, Some(RequestEvent::Transition(RequestStatus::Pending)));
        Admission::Fresh(record)
    }

    /// Submits and waits, returning the call's result.
    pub async fn send(&self, call: CallData) -> Result<Value, BridgeError> {
        let record = self.submit(call).await?;
        self.follow(&record).await
    }

    /// Sees `record` through to its outcome.
    ///
    /// A `PENDING` record nobody in this bridge is submitting was queued or
    /// left behind, so it is submitted here. Anything else in flight is waited
    /// on, and taken over if its driver goes quiet (see [`Bridge::wait`]).
    pub async fn follow(&self, record: &RequestRecord) -> Result<Value, BridgeError> {
        if let Some(outcome) = settle(record) {
            return outcome;
        }
        if record.status() == RequestStatus::Pending && !self.is_driving(record.id()) {
            return self.resume(record.id()).await;
        }
        self.wait(record.id()).await
    }

    /// Runs the bounded poll loop for a `POLLING` record and returns the
    /// resolved value.
    ///
    /// Progress is persisted, but the record is left in `POLLING`; finishing it
    /// is up to the caller ([`Bridge::resume`] does both).
    pub async fn poll(&self, id: &RequestId, options: PollOptions) -> Result<Value, BridgeError> {
        let mut record = self
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(id.clone()))?;
        self.poll_loop(&mut record, options).await
    }

    /// Continues a stored request from wherever it stopped.
    ///
    /// Terminal records settle immediately without network traffic. `POLLING`
    /// records re-enter the poll loop with their stored remote id. `PENDING`
    /// records are submitted again from their stored call data.
    pub async fn resume(&self, id: &RequestId) -> Result<Value, BridgeError> {
        let record = self
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(id.clone()))?;
        self.resume_record(record).await
    }

    pub(crate) async fn resume_record(&self, record: RequestRecord) -> Result<Value, BridgeError> {
        if let Some(outcome) = settle(&record) {
            return outcome;
        }
        let _driving = self.drive(record.id());
        tracing::info!(
            request_id = %record.id(),
            status = %record.status(),
            "Resuming request"
        );
        let record = match record.status() {
            RequestStatus::Polling => self.finish_polling(record).await?,
            _ => self.run_submission(record).await?,
        };
        settle(&record).unwrap_or(Ok(Value::Null))
    }

    async fn run_submission(&self, mut record: RequestRecord) -> Result<RequestRecord, BridgeError> {
        let timeout = self.inner.settings.poll_interval * self.inner.settings.poll_attempts;
        let outcome = match self.inner.relay.submit(record.call(), Some(timeout)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return Err(self.fail(&mut record, BridgeError::Transport(e.to_string())));
            }
        };

        match outcome {
            SubmitOutcome::Accepted(remote_id) => {
                tracing::debug!(
                    request_id = %record.id(),
                    remote_id = %remote_id,
                    "Relay accepted request"
                );
                record.accept(remote_id)?;
                self.commit(&record, Some(RequestEvent::Transition(RequestStatus::Polling)));
                self.finish_polling(record).await
            }
            SubmitOutcome::Completed(value) => {
                record.succeed(value)?;
                tracing::info!(request_id = %record.id(), "Request answered inline");
                self.commit(&record, Some(RequestEvent::Transition(RequestStatus::Success)));
                Ok(record)
            }
            SubmitOutcome::Rejected { status, body } => Err(self.fail(
                &mut record,
                BridgeError::Transport(format!("Error {status}: {body}")),
            )),
        }
    }

    async fn finish_polling(&self, mut record: RequestRecord) -> Result<RequestRecord, BridgeError> {
        match self.poll_loop(&mut record, self.poll_options()).await {
            Ok(value) => {
                record.succeed(value)?;
                tracing::info!(request_id = %record.id(), "Request succeeded");
                self.commit(&record, Some(RequestEvent::Transition(RequestStatus::Success)));
                Ok(record)
            }
            Err(e) => Err(self.fail(&mut record, e)),
        }
    }

    async fn poll_loop(
        &self,
        record: &mut RequestRecord,
        options: PollOptions,
    ) -> Result<Value, BridgeError> {
        let Some(remote_id) = record.remote_request_id().cloned() else {
            return Err(BridgeError::Transition(TransitionError {
                from: record.status(),
                to: "POLLING",
            }));
        };
        let limit = options.attempt_limit;

        for attempt in 1..=limit {
            record.record_progress(attempt, limit)?;
            self.commit(record, Some(RequestEvent::PollingProgress { attempt, limit }));
            tokio::time::sleep(options.interval).await;

            match self.inner.relay.poll(record.call(), &remote_id).await {
                Ok(PollOutcome::Pending | PollOutcome::NoResponseYet) => {
                    record.touch()?;
                    self.commit(record, Some(RequestEvent::Transition(RequestStatus::Polling)));
                }
                Ok(PollOutcome::Resolved(value)) => return Ok(value),
                Ok(PollOutcome::Failed { status, body }) => {
                    return Err(BridgeError::Poll(format!("Error {status}: {body}")));
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        request_id = %record.id(),
                        attempt,
                        limit,
                        "Poll attempt failed: {message}"
                    );
                    record.record_poll_error(message.as_str())?;
                    self.commit(record, None);
                    if attempt == limit {
                        return Err(BridgeError::Poll(message));
                    }
                }
            }
        }
        Err(BridgeError::PollTimeout { attempts: limit })
    }

    fn drive(&self, id: &RequestId) -> Driving<'_> {
        *self
            .inner
            .driving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default() += 1;
        Driving {
            bridge: self,
            id: id.clone(),
        }
    }

    pub(crate) fn is_driving(&self, id: &RequestId) -> bool {
        self.inner
            .driving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Longest a live driver leaves its record untouched: one poll sleep plus
    /// one relay round trip, with a refresh interval of slack.
    fn stall_after(&self) -> Duration {
        let settings = &self.inner.settings;
        settings.poll_interval + settings.request_timeout + settings.refresh_interval
    }

    /// In flight, not driven here, and untouched for longer than any live
    /// driver would leave it.
    pub(crate) fn is_stalled(&self, record: &RequestRecord) -> bool {
        !record.is_terminal()
            && !self.is_driving(record.id())
            && record
                .age(Utc::now())
                .to_std()
                .is_ok_and(|age| age > self.stall_after())
    }

    /// Moves `record` to `ERROR` with `error`'s message and hands the error back.
    fn fail(&self, record: &mut RequestRecord, error: BridgeError) -> BridgeError {
        if let Err(e) = record.fail(error.failure_message()) {
            return e.into();
        }
        tracing::warn!(request_id = %record.id(), "Request failed: {error}");
        self.commit(record, Some(RequestEvent::Transition(RequestStatus::Error)));
        error
    }
}
