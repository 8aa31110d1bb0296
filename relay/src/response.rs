//! Interpretation of relay response bodies.

use serde_json::Value;

/// Field that carries the recipient's answer inside a poll result.
pub const RESPONSE_FIELD: &str = "response";

/// Field the relay's acceptance body uses for its request id.
pub const REQUEST_ID_FIELD: &str = "request_id";

const PENDING_STATUS: &str = "pending";

/// Parses a body as JSON, falling back to the raw text. Empty bodies are `null`.
#[must_use]
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// `{"status": "pending"}` from the poll endpoint.
#[must_use]
pub fn is_pending(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some(PENDING_STATUS)
}

/// Nested `response` field when present, otherwise the whole body.
#[must_use]
pub fn extract_result(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key(RESPONSE_FIELD) => map
            .remove(RESPONSE_FIELD)
            .unwrap_or(Value::Null),
        other => other,
    }
}

/// Error body meaning "nothing yet, this poll round timed out". Retryable.
#[must_use]
pub fn is_poll_timeout_sentinel(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if lower.contains("polling timed out") {
        return true;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .as_ref()
        .and_then(|body| body.get("error"))
        .and_then(Value::as_str)
        .is_some_and(|error| {
            let error = error.to_ascii_lowercase();
            error == "timeout" || error.contains("timed out")
        })
}

/// The relay-assigned id from a 202 acceptance body.
#[must_use]
pub fn accepted_request_id(body: &Value) -> Option<String> {
    match body.get(REQUEST_ID_FIELD)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
