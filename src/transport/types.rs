//! Outbound call types and the call error taxonomy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the logical call id so servers can de-duplicate.
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Endpoint + method + headers + body of one outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CallTarget {
    /// A bodiless `GET` of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A `POST` of `url` with `body`.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header presence check.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Raw response of an outbound call. Any status is a successful *call*;
/// status classification happens in [`CallResponse::ensure_success`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl CallResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }

    /// Non-2xx statuses become [`CallError::Protocol`].
    pub fn ensure_success(self) -> Result<Self, CallError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CallError::Protocol { status: self.status })
        }
    }

    /// Parse the body according to its content type.
    pub fn parse_body(&self) -> Result<ResponseBody, CallError> {
        let content_type = self.content_type().unwrap_or_default().to_ascii_lowercase();

        if content_type.contains("application/json") {
            serde_json::from_slice(&self.body)
                .map(ResponseBody::Json)
                .map_err(|e| CallError::Serialization(e.to_string()))
        } else if content_type.starts_with("text/") {
            String::from_utf8(self.body.clone())
                .map(ResponseBody::Text)
                .map_err(|e| CallError::Serialization(e.to_string()))
        } else {
            Ok(ResponseBody::Binary {
                size: self.body.len(),
                content_type: (!content_type.is_empty()).then_some(content_type),
            })
        }
    }
}

/// Parsed response payload surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    Binary {
        size: usize,
        content_type: Option<String>,
    },
}

/// What went wrong at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Resolve,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Resolve => "name resolution failed",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(s)
    }
}

/// Errors an outbound call can end with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Timeout, refused or unresolvable endpoint. Retryable and a
    /// connectivity signal.
    #[error("{kind}: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Non-2xx response. Retryable.
    #[error("HTTP {status}")]
    Protocol { status: u16 },

    /// Body did not parse. Terminal.
    #[error("malformed response body: {0}")]
    Serialization(String),

    /// The call could not even be built (bad URL, bad method). Terminal.
    #[error("invalid call target: {0}")]
    InvalidTarget(String),
}

impl CallError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        CallError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Transport-class failures double as connectivity signals.
    pub fn is_transport(&self) -> bool {
        matches!(self, CallError::Transport { .. })
    }

    /// Terminal errors are never retried.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, CallError::Serialization(_) | CallError::InvalidTarget(_))
    }
}
