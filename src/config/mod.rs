use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared token-signing secret (HMAC-SHA256)
    pub secret: String,

    /// Path prefixes that bypass authentication
    pub public_prefixes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "change-me".to_string(),
            public_prefixes: vec![
                "/health".to_string(),
                "/api/auth/login".to_string(),
                "/api/auth/register".to_string(),
                "/api/v1/app/user/login".to_string(),
                "/api/v1/app/user/register".to_string(),
            ],
        }
    }
}

/// Circuit breaker tuning, shared by every backend's breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,

    /// Failure percentage at which the breaker opens
    pub error_threshold_pct: u32,

    /// How long the breaker stays open before allowing a probe, in milliseconds
    pub reset_timeout_ms: u64,

    /// Minimum number of calls in the rolling window before the breaker may trip
    pub volume_threshold: u32,

    /// Rolling statistics window in milliseconds
    pub window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            error_threshold_pct: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 10,
            window_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window size in milliseconds
    pub window_ms: u64,

    /// Maximum admitted requests per client address per window
    pub ceiling: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            ceiling: 300,
        }
    }
}

/// A downstream service the gateway fronts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefinition {
    /// Unique backend name, referenced by routes
    pub name: String,

    /// Base URL, e.g. http://127.0.0.1:9001
    pub base_url: String,
}

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub backends: Vec<BackendDefinition>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backends: default_backends(),
        }
    }
}

fn default_backends() -> Vec<BackendDefinition> {
    [
        ("identity", "http://127.0.0.1:9001"),
        ("fleet", "http://127.0.0.1:9002"),
        ("ledger", "http://127.0.0.1:9003"),
        ("analytics", "http://127.0.0.1:9004"),
        ("alerts", "http://127.0.0.1:9005"),
    ]
    .iter()
    .map(|(name, url)| BackendDefinition {
        name: name.to_string(),
        base_url: url.to_string(),
    })
    .collect()
}

fn env_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl GatewayConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset. Backend base URLs come from
    /// `GATEWAY_BACKEND_<NAME>_URL`; the breaker and rate-limit knobs from
    /// `GATEWAY_BREAKER_*` / `GATEWAY_RATE_*`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backends = defaults
            .backends
            .into_iter()
            .map(|mut b| {
                let key = format!("GATEWAY_BACKEND_{}_URL", b.name.to_uppercase());
                if let Ok(url) = env::var(&key) {
                    b.base_url = url;
                }
                b
            })
            .collect();

        Self {
            server: ServerConfig {
                host: env::var("GATEWAY_HOST").unwrap_or(defaults.server.host),
                port: env_parsed("GATEWAY_PORT", defaults.server.port),
            },
            auth: AuthConfig {
                secret: env::var("GATEWAY_TOKEN_SECRET").unwrap_or(defaults.auth.secret),
                public_prefixes: defaults.auth.public_prefixes,
            },
            breaker: BreakerConfig {
                call_timeout_ms: env_parsed(
                    "GATEWAY_BREAKER_TIMEOUT_MS",
                    defaults.breaker.call_timeout_ms,
                ),
                error_threshold_pct: env_parsed(
                    "GATEWAY_BREAKER_ERROR_THRESHOLD_PCT",
                    defaults.breaker.error_threshold_pct,
                ),
                reset_timeout_ms: env_parsed(
                    "GATEWAY_BREAKER_RESET_TIMEOUT_MS",
                    defaults.breaker.reset_timeout_ms,
                ),
                volume_threshold: env_parsed(
                    "GATEWAY_BREAKER_VOLUME_THRESHOLD",
                    defaults.breaker.volume_threshold,
                ),
                window_ms: env_parsed("GATEWAY_BREAKER_WINDOW_MS", defaults.breaker.window_ms),
            },
            rate_limit: RateLimitConfig {
                window_ms: env_parsed("GATEWAY_RATE_WINDOW_MS", defaults.rate_limit.window_ms),
                ceiling: env_parsed("GATEWAY_RATE_CEILING", defaults.rate_limit.ceiling),
            },
            backends,
        }
    }
}
