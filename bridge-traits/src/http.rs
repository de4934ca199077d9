//! HTTP bridge.
//!
//! Hosts supply a transport that performs exactly one attempt per
//! [`HttpClient::execute`] call. Retrying lives in one place, the provided
//! [`HttpClient::execute_with_retry`], so callers pick the policy and a down
//! server sees at most `max_attempts` requests per operation.

use async_trait::async_trait;
use bytes::Bytes;
use core_async::time::sleep;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

/// Outgoing request. Built with chained setters:
///
/// ```ignore
/// let request = HttpRequest::new(HttpMethod::Patch, url)
///     .bearer_token(token)
///     .json(&progress)?
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// Per-attempt bound; the transport default applies when `None`.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        let value = format!("Bearer {}", token.into());
        self.header("Authorization", value)
    }

    /// Encode `payload` as the body and mark it `application/json`.
    pub fn json<T: Serialize>(self, payload: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(payload).map_err(|e| {
            BridgeError::OperationFailed(format!("cannot encode request body: {}", e))
        })?;
        Ok(self
            .header("Content-Type", "application/json")
            .body(Bytes::from(encoded)))
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("cannot decode response body: {}", e))
        })
    }

    pub fn text(&self) -> Result<String> {
        std::str::from_utf8(&self.body)
            .map(str::to_owned)
            .map_err(|e| BridgeError::OperationFailed(format!("response is not UTF-8: {}", e)))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status, 400..=499)
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status, 500..=599)
    }

    /// 429 and 5xx: worth asking again after a pause.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.is_server_error()
    }
}

/// How [`HttpClient::execute_with_retry`] paces repeated attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Double the delay after each failed attempt instead of keeping it flat.
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no pause.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            use_exponential_backoff: false,
        }
    }

    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Host HTTP transport.
///
/// Implementations apply the request headers and timeout, validate TLS and
/// pool connections. They must not retry inside `execute`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send `request` once.
    ///
    /// Any status code is a successful exchange and comes back as a
    /// response; `Err` means no response was received (DNS, connect, TLS,
    /// timeout, broken body).
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Send `request` until it gets a non-retryable response or `policy`
    /// runs out of attempts.
    ///
    /// After the last attempt a retryable response is returned as is so the
    /// caller can map its status; a transport failure returns the last error.
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.execute(request.clone()).await;
            let retry = match &outcome {
                Ok(response) => response.is_retryable(),
                Err(_) => true,
            };
            if !retry || attempt >= attempts {
                return outcome;
            }
            sleep(policy.delay_after(attempt)).await;
            attempt += 1;
        }
    }
}
