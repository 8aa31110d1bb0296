use relaybridge_config::ConfigError;
use relaybridge_relay::RelayError;
use relaybridge_types::{RequestId, TransitionError, UrlError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Submission could not reach the relay, or the relay refused it.
    #[error("transport error: {0}")]
    Transport(String),
    /// A poll answered with a non-retryable failure.
    #[error("poll failed: {0}")]
    Poll(String),
    #[error("no response after {attempts} poll attempts")]
    PollTimeout { attempts: u32 },
    #[error("malformed syft url: {0}")]
    MalformedUrl(#[from] UrlError),
    /// The record reached `ERROR`; `message` is its stored failure.
    #[error("request {id} failed: {message}")]
    RequestFailed { id: RequestId, message: String },
    #[error("unknown request {0}")]
    NotFound(RequestId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("invalid bridge settings: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("failed to build relay client: {0}")]
    Client(#[source] RelayError),
}

impl BridgeError {
    /// Text stored as the record's failure when this error ends a request.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match self {
            Self::Transport(message) | Self::Poll(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
