//! Client for the store-and-forward relay.
//!
//! # Endpoints
//!
//! | Call   | Request | Outcome |
//! |--------|---------|---------|
//! | submit | `POST {server}/api/v1/send/msg?x-syft-url=..&x-syft-from=..` | 202 + `request_id` → queued; other 2xx → answered inline |
//! | poll   | `GET {server}/api/v1/send/poll?x-syft-request-id=..&x-syft-url=..&x-syft-from=..` | `{"status":"pending"}`, a result, or an error body |
//!
//! The client only classifies responses. What a classification means for a
//! request record is decided by the engine.
//!
//! # Error Handling
//!
//! HTTP-level failures (non-2xx) are values ([`SubmitOutcome::Rejected`],
//! [`PollOutcome::Failed`]) so the caller can record the body. Only failures that
//! leave no response to inspect (connection errors, bad headers) are
//! [`RelayError`]s.

pub mod headers;
pub mod response;

use std::time::Duration;

use relaybridge_types::{CallData, RemoteRequestId};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use headers::build_headers;

pub const SUBMIT_PATH: &str = "api/v1/send/msg";
pub const POLL_PATH: &str = "api/v1/send/poll";

const URL_PARAM: &str = "x-syft-url";
const FROM_PARAM: &str = "x-syft-from";
const REQUEST_ID_PARAM: &str = "x-syft-request-id";

// TCP keepalive and pool settings follow httpx defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to encode body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("{0}")]
    Network(#[from] reqwest::Error),
}

/// Result of handing a call to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Queued for asynchronous delivery; poll with this id.
    Accepted(RemoteRequestId),
    /// Answered inline with this body.
    Completed(Value),
    /// Refused. `body` is the raw response text.
    Rejected { status: u16, body: String },
}

/// Result of one poll round.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// `{"status": "pending"}`.
    Pending,
    /// The relay's "no response yet, polling timed out" error. Retryable.
    NoResponseYet,
    Resolved(Value),
    /// Any other error answer. Not retryable.
    Failed { status: u16, body: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[must_use]
pub fn client_builder(options: ClientOptions) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    server_url: Url,
}

impl RelayClient {
    pub fn new(server_url: Url, options: ClientOptions) -> Result<Self, RelayError> {
        let http = client_builder(options).build()?;
        Ok(Self::with_http_client(server_url, http))
    }

    /// Uses an existing client; `server_url` gets a trailing slash so endpoint
    /// paths join beneath it.
    #[must_use]
    pub fn with_http_client(mut server_url: Url, http: reqwest::Client) -> Self {
        if !server_url.path().ends_with('/') {
            let path = format!("{}/", server_url.path());
            server_url.set_path(&path);
        }
        Self { http, server_url }
    }

    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn submit_url(&self, call: &CallData) -> Result<Url, RelayError> {
        let mut url = self.server_url.join(SUBMIT_PATH)?;
        url.query_pairs_mut()
            .append_pair(URL_PARAM, &call.url().to_string())
            .append_pair(FROM_PARAM, call.from());
        Ok(url)
    }

    pub fn poll_url(&self, call: &CallData, remote_id: &RemoteRequestId) -> Result<Url, RelayError> {
        let mut url = self.server_url.join(POLL_PATH)?;
        url.query_pairs_mut()
            .append_pair(REQUEST_ID_PARAM, remote_id.as_str())
            .append_pair(URL_PARAM, &call.url().to_string())
            .append_pair(FROM_PARAM, call.from());
        Ok(url)
    }

    /// Sends the call to the relay's submission endpoint.
    pub async fn submit(
        &self,
        call: &CallData,
        timeout: Option<Duration>,
    ) -> Result<SubmitOutcome, RelayError> {
        let url = self.submit_url(call)?;
        let headers = build_headers(call, timeout)?;
        let mut request = self.http.post(url).headers(headers);
        if call.body().is_some() {
            request = request.body(call.body_text()?);
        }

        tracing::debug!(url = %call.url(), method = %call.method(), "Submitting call to relay");
        let reply = request.send().await?;
        let status = reply.status();
        let text = reply.text().await?;

        if status == StatusCode::ACCEPTED {
            let body = response::parse_body(&text);
            let remote_id = response::accepted_request_id(&body).and_then(RemoteRequestId::new);
            return Ok(match remote_id {
                Some(remote_id) => SubmitOutcome::Accepted(remote_id),
                None => SubmitOutcome::Rejected {
                    status: status.as_u16(),
                    body: format!("missing {}", response::REQUEST_ID_FIELD),
                },
            });
        }
        if status.is_success() {
            return Ok(SubmitOutcome::Completed(response::parse_body(&text)));
        }
        Ok(SubmitOutcome::Rejected {
            status: status.as_u16(),
            body: text,
        })
    }

    /// One GET against the poll endpoint.
    pub async fn poll(
        &self,
        call: &CallData,
        remote_id: &RemoteRequestId,
    ) -> Result<PollOutcome, RelayError> {
        let url = self.poll_url(call, remote_id)?;
        let reply = self.http.get(url).send().await?;
        let status = reply.status();
        let text = reply.text().await?;

        if status.is_success() {
            let body = response::parse_body(&text);
            if response::is_pending(&body) {
                return Ok(PollOutcome::Pending);
            }
            return Ok(PollOutcome::Resolved(response::extract_result(body)));
        }
        if response::is_poll_timeout_sentinel(&text) {
            return Ok(PollOutcome::NoResponseYet);
        }
        Ok(PollOutcome::Failed {
            status: status.as_u16(),
            body: text,
        })
    }
}
