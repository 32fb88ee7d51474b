use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no credentials provided")]
    Unauthenticated,

    #[error("authentication failed: {0}")]
    InvalidToken(#[from] AuthError),

    #[error("too many requests")]
    RateLimited,

    #[error("no route found for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("backend {backend} unavailable")]
    BackendUnavailable { backend: String },

    #[error("backend {backend} timed out")]
    BackendTimeout { backend: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal server error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// HTTP status code mapping for gateway errors
impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated => 401,
            GatewayError::InvalidToken(_) => 401,
            GatewayError::RateLimited => 429,
            GatewayError::RouteNotFound { .. } => 404,
            GatewayError::BackendUnavailable { .. } => 503,
            GatewayError::BackendTimeout { .. } => 504,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::ConfigError(_) => 500,
            GatewayError::InternalError(_) => 500,
            GatewayError::IoError(_) => 500,
        }
    }

    /// Short machine-readable tag used in error response bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "unauthenticated",
            GatewayError::InvalidToken(_) => "invalid_token",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::BackendTimeout { .. } => "backend_timeout",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::ConfigError(_) => "config_error",
            GatewayError::InternalError(_) => "internal_error",
            GatewayError::IoError(_) => "io_error",
        }
    }

    /// Backend this error is attributed to, if any
    pub fn backend(&self) -> Option<&str> {
        match self {
            GatewayError::BackendUnavailable { backend } => Some(backend),
            GatewayError::BackendTimeout { backend } => Some(backend),
            _ => None,
        }
    }
}

/// Authentication specific errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,
}
