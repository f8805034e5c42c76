//! [`HttpClient`] over `reqwest`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooled `reqwest` client with rustls and bounded retries
pub struct ReqwestHttpClient {
    client: Client,
}

/// Outcome of one attempt
enum Attempt {
    Done(HttpResponse),
    Retry(BridgeError),
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("listing-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("reqwest client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
        }
    }

    async fn attempt(&self, request: &HttpRequest) -> Result<Attempt> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(Attempt::Retry(BridgeError::Timeout(request.url.clone())))
            }
            Err(e) => return Ok(Attempt::Retry(BridgeError::OperationFailed(e.to_string()))),
        };

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Ok(Attempt::Retry(BridgeError::OperationFailed(format!(
                "{} answered {}",
                request.url, status
            ))));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();
        // A body that breaks off mid-transfer is not retried
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("reading body: {}", e)))?;

        Ok(Attempt::Done(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        }))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut retry = 0;

        loop {
            debug!(method = ?request.method, url = %request.url, attempt = retry + 1, "HTTP request");

            let error = match self.attempt(&request).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::Retry(error) => error,
            };

            retry += 1;
            if retry >= attempts {
                warn!(url = %request.url, attempts, error = %error, "HTTP request gave up");
                return Err(error);
            }

            let delay = policy.delay_before(retry);
            warn!(url = %request.url, error = %error, delay_ms = delay.as_millis() as u64, "HTTP request will be retried");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(ReqwestHttpClient::new().is_ok());
        assert!(ReqwestHttpClient::with_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_methods_map_to_reqwest() {
        assert_eq!(ReqwestHttpClient::method(HttpMethod::Get), Method::GET);
        assert_eq!(ReqwestHttpClient::method(HttpMethod::Head), Method::HEAD);
        assert_eq!(ReqwestHttpClient::method(HttpMethod::Post), Method::POST);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_single_attempt() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        // Port 9 on loopback refuses connections
        let request = HttpRequest::get("http://127.0.0.1:9/listing.jpg");

        let result = client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await;
        assert!(result.is_err());
    }
}
