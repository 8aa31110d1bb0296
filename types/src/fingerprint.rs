//! Deterministic digests of logical calls, used to spot duplicate submissions.
//!
//! Normalization is shared by every strategy:
//!
//! 1. Drop headers whose name contains `timestamp` (any case).
//! 2. Lowercase the remaining names and sort them.
//! 3. Join `destination | method | headers-as-JSON | body-text` with `|`.
//!
//! The joined text is then hashed by a [`Fingerprinter`]. Collision resistance is
//! only needed to keep unrelated calls apart, not against an adversary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::call::CallData;

pub const FINGERPRINT_PREFIX: &str = "fp_";

const SEPARATOR: &str = "|";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Time-derived identity for calls that cannot be normalized.
    ///
    /// Never equal to a digest, so the call is never deduplicated.
    #[must_use]
    pub fn volatile() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Self(format!("{FINGERPRINT_PREFIX}t{nanos:x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes the normalized text of a call.
pub trait Fingerprinter: Send + Sync {
    fn digest(&self, normalized: &str) -> String;

    fn fingerprint(&self, call: &CallData) -> Fingerprint {
        match normalize(call) {
            Some(text) => Fingerprint(format!("{FINGERPRINT_PREFIX}{}", self.digest(&text))),
            None => Fingerprint::volatile(),
        }
    }
}

/// Builds the text every strategy hashes. `None` when the body cannot be rendered.
#[must_use]
pub fn normalize(call: &CallData) -> Option<String> {
    let headers: BTreeMap<String, &str> = call
        .headers()
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .filter(|(name, _)| !name.contains("timestamp"))
        .collect();
    let headers = serde_json::to_string(&headers).ok()?;
    let body = call.body_text().ok()?;

    Some(
        [
            call.url().to_string().as_str(),
            call.method().as_str(),
            headers.as_str(),
            body.as_str(),
        ]
        .join(SEPARATOR),
    )
}

/// SHA-256 over the normalized text, truncated to 128 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHash;

impl Fingerprinter for ContentHash {
    fn digest(&self, normalized: &str) -> String {
        let hash = Sha256::digest(normalized.as_bytes());
        hash[..16].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// 32-bit `h * 31 + unit` rolling hash over UTF-16 code units.
///
/// Matches fingerprints written by older clients sharing the same store.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingHash;

impl Fingerprinter for RollingHash {
    fn digest(&self, normalized: &str) -> String {
        let hash = normalized
            .encode_utf16()
            .fold(0i32, |h, unit| {
                (h << 5).wrapping_sub(h).wrapping_add(i32::from(unit))
            });
        format!("{:08x}", hash as u32)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    #[default]
    Sha256,
    Rolling,
}

impl FingerprintStrategy {
    #[must_use]
    pub fn fingerprinter(self) -> Box<dyn Fingerprinter> {
        match self {
            Self::Sha256 => Box::new(ContentHash),
            Self::Rolling => Box::new(RollingHash),
        }
    }
}
