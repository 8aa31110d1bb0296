//! `syft://` addressing for tunneled calls.
//!
//! A call destination names the recipient datasite, the application and the
//! application endpoint:
//!
//! ```text
//! syft://alice@openmined.org/app_data/my_app/rpc/ping
//!        \_______________/           \____/     \__/
//!            recipient                 app    endpoint
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SYFT_SCHEME: &str = "syft://";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("url must start with {SYFT_SCHEME} (got {0})")]
    Scheme(String),
    #[error("invalid recipient address '{0}'")]
    Recipient(String),
    #[error("url path must look like /app_data/<app>/rpc/<endpoint> (got {0})")]
    Path(String),
    #[error("app name cannot be empty")]
    EmptyApp,
    #[error("endpoint cannot be empty")]
    EmptyEndpoint,
    #[error("invalid character {ch:?} in {part}")]
    InvalidChar { part: &'static str, ch: char },
}

/// Validated destination of a tunneled call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyftUrl {
    recipient: String,
    app: String,
    endpoint: String,
}

impl SyftUrl {
    pub fn new(
        recipient: impl Into<String>,
        app: impl Into<String>,
        endpoint: impl AsRef<str>,
    ) -> Result<Self, UrlError> {
        let recipient = recipient.into();
        let app = app.into();
        let endpoint = endpoint.as_ref().trim_matches('/').to_string();

        validate_address(&recipient)?;
        if app.is_empty() {
            return Err(UrlError::EmptyApp);
        }
        validate_segment("app", &app)?;
        if endpoint.is_empty() {
            return Err(UrlError::EmptyEndpoint);
        }
        for part in endpoint.split('/') {
            if part.is_empty() {
                return Err(UrlError::Path(endpoint.clone()));
            }
            validate_segment("endpoint", part)?;
        }

        Ok(Self {
            recipient,
            app,
            endpoint,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let rest = raw
            .trim()
            .strip_prefix(SYFT_SCHEME)
            .ok_or_else(|| UrlError::Scheme(raw.to_string()))?;
        let (recipient, path) = rest
            .split_once('/')
            .ok_or_else(|| UrlError::Path(raw.to_string()))?;

        let path_err = || UrlError::Path(format!("/{path}"));
        let path = path.strip_prefix("app_data/").ok_or_else(path_err)?;
        let (app, path) = path.split_once('/').ok_or_else(path_err)?;
        let endpoint = path.strip_prefix("rpc/").ok_or_else(path_err)?;

        Self::new(recipient, app, endpoint)
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Checks that `address` looks like `local@domain`.
pub fn validate_address(address: &str) -> Result<(), UrlError> {
    let bad = || UrlError::Recipient(address.to_string());
    let (local, domain) = address.split_once('@').ok_or_else(bad)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(bad());
    }
    if address.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(bad());
    }
    Ok(())
}

fn validate_segment(part: &'static str, value: &str) -> Result<(), UrlError> {
    match value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        Some(ch) => Err(UrlError::InvalidChar { part, ch }),
        None => Ok(()),
    }
}

impl fmt::Display for SyftUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SYFT_SCHEME}{}/app_data/{}/rpc/{}",
            self.recipient, self.app, self.endpoint
        )
    }
}

impl FromStr for SyftUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SyftUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SyftUrl> for String {
    fn from(value: SyftUrl) -> Self {
        value.to_string()
    }
}
