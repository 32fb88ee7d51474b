use std::collections::HashMap;
use std::time::SystemTime;

use hmac::{Hmac, Mac};
use hyper::HeaderMap;
use jwt::VerifyWithKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AuthError, GatewayError};

/// Claims contained in a bearer token. Attached to a request's context for
/// the duration of that request only; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Issued at (as Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Not before (as Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Custom claims
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Create new claims for a subject (user ID)
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            sub: subject.into(),
            iss: None,
            exp: None,
            iat: Some(unix_now()),
            nbf: None,
            custom: HashMap::new(),
        }
    }

    /// Set expiration time
    pub fn with_expiration(mut self, seconds_from_now: u64) -> Self {
        self.exp = Some(unix_now() + seconds_from_now);
        self
    }

    /// Check if the claims are expired
    pub fn is_expired(&self) -> bool {
        matches!(self.exp, Some(exp) if exp < unix_now())
    }

    /// Check if the claims are not yet valid
    pub fn is_not_valid_yet(&self) -> bool {
        matches!(self.nbf, Some(nbf) if nbf > unix_now())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Stateless bearer-token verifier against the shared signing secret.
/// The gateway never issues tokens; login is proxied to the identity
/// backend and this only checks what comes back on later requests.
pub struct TokenVerifier {
    key: Hmac<Sha256>,
    public_prefixes: Vec<String>,
}

impl TokenVerifier {
    pub fn new(secret: &str, public_prefixes: Vec<String>) -> Result<Self, GatewayError> {
        let key = Hmac::new_from_slice(secret.as_bytes())
            .map_err(|_| GatewayError::ConfigError("invalid signing secret".to_string()))?;

        Ok(Self {
            key,
            public_prefixes,
        })
    }

    /// Whether the path is on the public allowlist (exact-prefix match)
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes.iter().any(|p| path.starts_with(p))
    }

    /// Extract and verify the bearer token. Missing credentials and bad
    /// credentials are distinct failures so operators can tell them apart.
    pub fn verify(&self, headers: &HeaderMap) -> Result<Claims, GatewayError> {
        let token = extract_bearer(headers).ok_or(GatewayError::Unauthenticated)?;

        let claims: Claims = token
            .verify_with_key(&self.key)
            .map_err(|_| AuthError::InvalidToken)?;

        if claims.is_expired() {
            return Err(AuthError::TokenExpired.into());
        }

        if claims.is_not_valid_yet() {
            return Err(AuthError::TokenNotYetValid.into());
        }

        Ok(claims)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|auth_header| auth_header.strip_prefix("Bearer "))
}
