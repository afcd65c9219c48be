//! `reqwest`-backed HTTP transport.

use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::transport::{CallError, CallResponse, CallTarget, Transport, TransportErrorKind};

/// HTTP transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("linkguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallError::transport(TransportErrorKind::Other, e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (custom proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, target: &CallTarget, timeout: Duration) -> Result<CallResponse, CallError> {
        let method = Method::from_bytes(target.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CallError::InvalidTarget(format!("unsupported method '{}'", target.method)))?;
        let url = url::Url::parse(&target.url)
            .map_err(|e| CallError::InvalidTarget(format!("'{}': {}", target.url, e)))?;

        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &target.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(classify)?;

        Ok(CallResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Map a `reqwest` failure onto the call error taxonomy.
fn classify(err: reqwest::Error) -> CallError {
    if err.is_builder() {
        return CallError::InvalidTarget(err.to_string());
    }

    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        if source_chain_mentions(&err, "dns") || source_chain_mentions(&err, "resolve") {
            TransportErrorKind::Resolve
        } else {
            TransportErrorKind::Connect
        }
    } else {
        TransportErrorKind::Other
    };

    CallError::Transport {
        kind,
        message: err.to_string(),
    }
}

fn source_chain_mentions(err: &reqwest::Error, needle: &str) -> bool {
    let mut source = err.source();
    while let Some(s) = source {
        if s.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        source = s.source();
    }
    false
}
