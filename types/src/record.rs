//! Request records and their lifecycle.
//!
//! ```text
//!            accept(remote id)
//!   PENDING ──────────────────▶ POLLING ──┐ progress / touch
//!      │                          │  ▲────┘
//!      │ succeed / fail           │ succeed / fail
//!      ▼                          ▼
//!   SUCCESS | ERROR  (terminal, no way out)
//! ```
//!
//! Every mutation refreshes `last_updated`. Invariants are checked both when a
//! transition is applied and when a record is read back from storage.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::call::CallData;
use crate::fingerprint::Fingerprint;
use crate::ids::{RemoteRequestId, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Polling,
    Success,
    Error,
}

impl RequestStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Polling => "POLLING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What observers are told about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// The record entered (or re-asserted) `status`.
    Transition(RequestStatus),
    /// A poll attempt is about to run. Not a state change.
    PollingProgress { attempt: u32, limit: u32 },
}

impl RequestEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transition(status) => status.as_str(),
            Self::PollingProgress { .. } => "POLLING_PROGRESS",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid request transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RequestStatus,
    pub to: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{0} record must not carry a relay request id")]
    UnexpectedRemoteId(RequestStatus),
    #[error("POLLING record is missing its relay request id")]
    MissingRemoteId,
    #[error("{0} record must not carry a result")]
    UnexpectedResult(RequestStatus),
    #[error("{0} record must not carry a failure")]
    UnexpectedFailure(RequestStatus),
    #[error("ERROR record is missing its failure message")]
    MissingFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordWire", into = "RecordWire")]
pub struct RequestRecord {
    id: RequestId,
    fingerprint: Fingerprint,
    call: CallData,
    status: RequestStatus,
    remote_request_id: Option<RemoteRequestId>,
    result: Option<Value>,
    failure: Option<String>,
    poll_attempt: u32,
    poll_attempt_limit: u32,
    last_poll_error: Option<String>,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl RequestRecord {
    /// A fresh `PENDING` record for `call`.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, call: CallData) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::generate(),
            fingerprint,
            call,
            status: RequestStatus::Pending,
            remote_request_id: None,
            result: None,
            failure: None,
            poll_attempt: 0,
            poll_attempt_limit: 0,
            last_poll_error: None,
            created_at: now,
            last_updated: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn call(&self) -> &CallData {
        &self.call
    }

    #[must_use]
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    #[must_use]
    pub fn remote_request_id(&self) -> Option<&RemoteRequestId> {
        self.remote_request_id.as_ref()
    }

    /// Present only in `SUCCESS`.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Present only in `ERROR`.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    #[must_use]
    pub fn poll_attempt(&self) -> u32 {
        self.poll_attempt
    }

    #[must_use]
    pub fn poll_attempt_limit(&self) -> u32 {
        self.poll_attempt_limit
    }

    /// Most recent network error seen while polling, kept for inspection.
    #[must_use]
    pub fn last_poll_error(&self) -> Option<&str> {
        self.last_poll_error.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time since the last mutation, clamped at zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_updated).max(Duration::zero())
    }

    /// `PENDING` → `POLLING` once the relay has queued the call.
    pub fn accept(&mut self, remote_id: RemoteRequestId) -> Result<(), TransitionError> {
        self.require(RequestStatus::Pending, "POLLING")?;
        self.status = RequestStatus::Polling;
        self.remote_request_id = Some(remote_id);
        self.bump();
        Ok(())
    }

    /// Re-asserts `POLLING` after a pending poll answer.
    pub fn touch(&mut self) -> Result<(), TransitionError> {
        self.require(RequestStatus::Polling, "POLLING")?;
        self.bump();
        Ok(())
    }

    pub fn record_progress(&mut self, attempt: u32, limit: u32) -> Result<(), TransitionError> {
        self.require(RequestStatus::Polling, "POLLING_PROGRESS")?;
        self.poll_attempt = attempt;
        self.poll_attempt_limit = limit;
        self.bump();
        Ok(())
    }

    pub fn record_poll_error(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require(RequestStatus::Polling, "POLLING")?;
        self.last_poll_error = Some(message.into());
        self.bump();
        Ok(())
    }

    pub fn succeed(&mut self, result: Value) -> Result<(), TransitionError> {
        self.require_live("SUCCESS")?;
        self.status = RequestStatus::Success;
        self.result = Some(result);
        self.finish();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require_live("ERROR")?;
        self.status = RequestStatus::Error;
        self.failure = Some(message.into());
        self.finish();
        Ok(())
    }

    fn require(&self, expected: RequestStatus, to: &'static str) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    fn require_live(&self, to: &'static str) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            Err(TransitionError {
                from: self.status,
                to,
            })
        } else {
            Ok(())
        }
    }

    fn finish(&mut self) {
        self.poll_attempt = 0;
        self.poll_attempt_limit = 0;
        self.bump();
    }

    fn bump(&mut self) {
        // Keep timestamps monotonic even if the wall clock steps back.
        self.last_updated = Utc::now().max(self.last_updated);
    }

    fn validate(&self) -> Result<(), RecordError> {
        let status = self.status;
        match status {
            RequestStatus::Pending if self.remote_request_id.is_some() => {
                return Err(RecordError::UnexpectedRemoteId(status));
            }
            RequestStatus::Polling if self.remote_request_id.is_none() => {
                return Err(RecordError::MissingRemoteId);
            }
            RequestStatus::Error if self.failure.is_none() => {
                return Err(RecordError::MissingFailure);
            }
            _ => {}
        }
        if status != RequestStatus::Success && self.result.is_some() {
            return Err(RecordError::UnexpectedResult(status));
        }
        if status != RequestStatus::Error && self.failure.is_some() {
            return Err(RecordError::UnexpectedFailure(status));
        }
        Ok(())
    }
}

/// Storage shape. Field names are shared with every client of the store.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    id: RequestId,
    fingerprint: Fingerprint,
    call_data: CallData,
    status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_request_id: Option<RemoteRequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(default)]
    poll_attempt: u32,
    #[serde(default)]
    poll_attempt_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_poll_error: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<RecordWire> for RequestRecord {
    type Error = RecordError;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        // A successful call may legitimately return JSON null, which serde reads as None.
        let result = match wire.status {
            RequestStatus::Success => Some(wire.result.unwrap_or(Value::Null)),
            _ => wire.result,
        };
        let record = Self {
            id: wire.id,
            fingerprint: wire.fingerprint,
            call: wire.call_data,
            status: wire.status,
            remote_request_id: wire.remote_request_id,
            result,
            failure: wire.failure,
            poll_attempt: wire.poll_attempt,
            poll_attempt_limit: wire.poll_attempt_limit,
            last_poll_error: wire.last_poll_error,
            created_at: wire.created_at.unwrap_or(wire.last_updated),
            last_updated: wire.last_updated,
        };
        record.validate()?;
        Ok(record)
    }
}

impl From<RequestRecord> for RecordWire {
    fn from(record: RequestRecord) -> Self {
        Self {
            id: record.id,
            fingerprint: record.fingerprint,
            call_data: record.call,
            status: record.status,
            remote_request_id: record.remote_request_id,
            result: record.result,
            failure: record.failure,
            poll_attempt: record.poll_attempt,
            poll_attempt_limit: record.poll_attempt_limit,
            last_poll_error: record.last_poll_error,
            created_at: Some(record.created_at),
            last_updated: record.last_updated,
        }
    }
}
