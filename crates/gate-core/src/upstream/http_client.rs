use crate::upstream::UpstreamError;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Pooled HTTP client shared by every [`super::HttpTransport`] in a process.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("gate/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Sanitizes network errors so upstream URLs and addresses never reach clients.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "unexpected redirect".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Posts a JSON body and returns the response body. Never retries.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] if the call exceeds `timeout`
    /// - [`UpstreamError::HttpError`] for non-success HTTP status codes
    /// - [`UpstreamError::ConnectionFailed`] for network-related failures
    pub async fn post_json(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, UpstreamError> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::trace!(status = status.as_u16(), "http request failed");
            return Err(UpstreamError::HttpError(status.as_u16()));
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
            }
        })
    }
}
