//! Core domain types for relaybridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the bridge: the store adapter
//! serializes [`RequestRecord`]s, the relay client reads [`CallData`], and the engine
//! drives the record state machine.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod call;
mod fingerprint;
mod ids;
mod record;
mod url;

pub use call::{CallData, MethodParseError, RpcMethod};
pub use fingerprint::{
    ContentHash, FINGERPRINT_PREFIX, Fingerprint, FingerprintStrategy, Fingerprinter,
    RollingHash, normalize,
};
pub use ids::{RemoteRequestId, RequestId};
pub use record::{
    RecordError, RequestEvent, RequestRecord, RequestStatus, TransitionError,
};
pub use url::{SYFT_SCHEME, SyftUrl, UrlError, validate_address};
