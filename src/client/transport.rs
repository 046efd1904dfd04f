//! Network seam between [`super::InferenceClient`] and the service.
//!
//! The client only needs "send this JSON to that route, give me JSON back";
//! everything HTTP-specific stays in [`HttpTransport`]. Tests substitute an
//! in-memory implementation.

use super::protocol::Route;
use crate::error::{InferenceError, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One request/response exchange with the inference service.
///
/// Implementations perform a single attempt; retries, timeouts and the
/// circuit breaker are the client's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, route: Route, body: Option<Value>) -> Result<Value, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| InferenceError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: Route) -> String {
        format!("{}{}", self.base_url, route.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, route: Route, body: Option<Value>) -> Result<Value, TransportError> {
        let url = self.url(route);
        let request = if route.is_get() {
            self.http.get(&url)
        } else {
            self.http.post(&url).json(&body.unwrap_or(Value::Null))
        };

        debug!("→ {} {}", if route.is_get() { "GET" } else { "POST" }, url);
        let response = request.send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout { elapsed_ms: 0 }
    } else if let Some(status) = e.status() {
        TransportError::Status {
            status: status.as_u16(),
            body: e.to_string(),
        }
    } else {
        // Connect, TLS, reset mid-body, …
        TransportError::Connect(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
