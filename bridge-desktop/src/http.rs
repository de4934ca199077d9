//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("audioshelf-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// One request per `execute`; retries come from the trait's
/// `execute_with_retry`.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a client with a 30 second request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(Self::convert_method(request.method), &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to read body: {}", e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn transport_error(e: &reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::OperationFailed("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::OperationFailed(format!("Connection failed: {}", e))
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, "Executing HTTP request");
        match self.build_request(request).send().await {
            Ok(response) => Self::into_response(response).await,
            Err(e) => {
                warn!(error = %e, "HTTP request failed");
                Err(Self::transport_error(&e))
            }
        }
    }
}
