use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};

use crate::error::GatewayError;

/// Represents a response from the API Gateway
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Backend service that processed the request (if applicable)
    pub backend_name: Option<String>,

    /// Time taken to process the request in milliseconds
    pub processing_time_ms: u64,
}

impl GatewayResponse {
    /// Create a new GatewayResponse
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            backend_name: None,
            processing_time_ms: 0,
        }
    }

    /// Create a JSON response with the given status
    pub fn json(status: StatusCode, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, body)
    }

    /// Build the structured client response for a gateway error
    pub fn from_error(error: &GatewayError) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
        });
        if let Some(backend) = error.backend() {
            body["backend"] = serde_json::Value::String(backend.to_string());
        }

        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        let mut response = Self::json(status, Bytes::from(bytes));
        response.backend_name = error.backend().map(|b| b.to_string());
        response
    }

    /// Set backend name for this response
    pub fn with_backend_name(mut self, backend_name: String) -> Self {
        self.backend_name = Some(backend_name);
        self
    }

    /// Set processing time for this response
    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }
}
