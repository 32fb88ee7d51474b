use std::time::Duration;

use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};
use tracing::debug;

use crate::breaker::BackendService;
use crate::core::request::GatewayRequest;
use crate::error::GatewayError;

/// Response from a live backend call, success or not; a non-2xx backend
/// answer is still a response and is passed through by the dispatcher.
#[derive(Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Outbound HTTP client for backend calls. Forwards method, body and the
/// original Authorization header unchanged; never re-signs credentials.
pub struct BackendClient {
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(call_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(call_timeout)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("backend http client: {}", e)))?;

        Ok(Self { client })
    }

    /// Call `service` at `target_path`, bounded by `timeout`. The timeout
    /// is the breaker's per-call bound and is enforced gateway-side,
    /// independent of backend cooperation. One deadline covers the whole
    /// exchange, so a backend that answers its headers quickly but drips
    /// the body cannot stretch the call past the bound.
    pub async fn forward(
        &self,
        service: &BackendService,
        target_path: &str,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, GatewayError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = format!("{}{}", service.base_url, target_path);
        debug!(backend = %service.name, %url, "forwarding request");

        let mut headers = HeaderMap::new();
        for name in [hyper::header::AUTHORIZATION, hyper::header::CONTENT_TYPE] {
            if let Some(value) = request.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        let outbound = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .body(request.body.clone())
            .send();

        let response = match tokio::time::timeout_at(deadline, outbound).await {
            Err(_) => {
                return Err(GatewayError::BackendTimeout {
                    backend: service.name.clone(),
                })
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(GatewayError::BackendTimeout {
                    backend: service.name.clone(),
                })
            }
            Ok(Err(_)) => {
                return Err(GatewayError::BackendUnavailable {
                    backend: service.name.clone(),
                })
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match tokio::time::timeout_at(deadline, response.bytes()).await {
            Ok(Ok(body)) => body,
            _ => {
                return Err(GatewayError::BackendTimeout {
                    backend: service.name.clone(),
                })
            }
        };

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_connect_timeout() {
        assert!(BackendClient::new(Duration::from_millis(10)).is_ok());
    }
}
