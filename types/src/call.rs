//! The logical call a record tracks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::url::{SyftUrl, UrlError, validate_address};

/// HTTP method tunneled through the relay to the recipient app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RpcMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Error)]
#[error("unsupported method '{0}'; expected one of GET, POST, PUT, PATCH, DELETE")]
pub struct MethodParseError(pub String);

impl RpcMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MethodParseError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(MethodParseError(raw.to_string())),
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination, method, headers and body of one logical call.
///
/// Immutable once a record has been created for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallData {
    url: SyftUrl,
    from: String,
    #[serde(default)]
    method: RpcMethod,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

impl CallData {
    /// `from` is the originator address the relay attributes the call to.
    pub fn new(url: SyftUrl, from: impl Into<String>) -> Result<Self, UrlError> {
        let from = from.into();
        validate_address(&from)?;
        Ok(Self {
            url,
            from,
            method: RpcMethod::default(),
            headers: BTreeMap::new(),
            body: None,
        })
    }

    #[must_use]
    pub fn with_method(mut self, method: RpcMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn url(&self) -> &SyftUrl {
        &self.url
    }

    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn method(&self) -> RpcMethod {
        self.method
    }

    /// Caller-supplied headers, without the relay protocol defaults.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Body as the text that goes on the wire: strings verbatim, other JSON serialized,
    /// no body as the empty string.
    pub fn body_text(&self) -> Result<String, serde_json::Error> {
        match &self.body {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => serde_json::to_string(other),
        }
    }
}
