//! Outbound headers for a tunneled call.
//!
//! Protocol defaults go in first, caller headers are layered on top; on a name
//! collision (case-insensitive) the caller's value wins.

use std::time::Duration;

use relaybridge_types::CallData;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::RelayError;

pub const MSG_TYPE_HEADER: &str = "x-syft-msg-type";
pub const FROM_HEADER: &str = "x-syft-from";
pub const TO_HEADER: &str = "x-syft-to";
pub const APP_HEADER: &str = "x-syft-app";
pub const ENDPOINT_HEADER: &str = "x-syft-appep";
pub const METHOD_HEADER: &str = "x-syft-method";
pub const TIMEOUT_HEADER: &str = "x-syft-timeout";

pub const REQUEST_MSG_TYPE: &str = "request";

/// Defaults followed by the caller's headers.
///
/// `timeout` is advertised to the recipient as `x-syft-timeout` in milliseconds.
pub fn build_headers(call: &CallData, timeout: Option<Duration>) -> Result<HeaderMap, RelayError> {
    let url = call.url();
    let mut defaults: Vec<(&str, String)> = vec![
        (MSG_TYPE_HEADER, REQUEST_MSG_TYPE.to_string()),
        (FROM_HEADER, call.from().to_string()),
        (TO_HEADER, url.recipient().to_string()),
        (APP_HEADER, url.app().to_string()),
        (ENDPOINT_HEADER, url.endpoint().to_string()),
        (METHOD_HEADER, call.method().as_str().to_string()),
    ];
    if let Some(timeout) = timeout {
        defaults.push((TIMEOUT_HEADER, timeout.as_millis().to_string()));
    }
    if call.body().is_some() {
        defaults.push((CONTENT_TYPE.as_str(), "application/json".to_string()));
    }

    let caller = call
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.clone()));

    let mut headers = HeaderMap::new();
    for (name, value) in defaults.into_iter().chain(caller) {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| RelayError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|e| RelayError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
