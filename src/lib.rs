// Fleet Gateway Library

pub mod adapt;
pub mod auth;
pub mod breaker;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod limit;
pub mod proxy;

// Re-export commonly used types
pub use adapt::AdapterId;
pub use auth::{Claims, TokenVerifier};
pub use breaker::{BackendService, BreakerRegistry, BreakerState, CircuitBreaker};
pub use config::GatewayConfig;
pub use self::core::{
    gateway::{Dispatcher, Gateway},
    request::GatewayRequest,
    response::GatewayResponse,
    routes::{fleet_routes, Route, RouteTable},
};
pub use error::{AuthError, GatewayError};
pub use health::{HealthAggregator, HealthReport};
pub use limit::RateLimiter;
