//! Bearer token authentication for the load balancer control plane.
//!
//! Tokens are HS256-signed JWTs whose `sub` claim carries the caller's
//! hex-encoded account id. Two optional claims shape authorization:
//! `name` (the user within the account) and `admin` (administrator
//! privilege, which unlocks cross-account operations).
//!
//! # Example
//!
//! ```no_run
//! use lbcp_auth::{AuthConfig, JwtValidator, SharedSecretValidator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig {
//!     secret: "change-me".to_string(),
//!     issuer: "lbcp".to_string(),
//!     audience: "lbcp-api".to_string(),
//! };
//!
//! let validator = SharedSecretValidator::new(config);
//!
//! let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...";
//! let claims = validator.validate(token).await?;
//!
//! println!("Account: {}", claims.account_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod jwt;

pub use error::{AuthError, Result};
pub use jwt::{JwtValidator, SharedSecretValidator, ValidatedClaims};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockJwtValidator;

/// Configuration for bearer token validation.
#[derive(Clone)]
pub struct AuthConfig {
    /// Shared HMAC signing secret.
    pub secret: String,
    /// Expected JWT issuer (`iss` claim).
    pub issuer: String,
    /// Expected JWT audience (`aud` claim).
    pub audience: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "lbcp".to_string(),
            audience: "lbcp-api".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.issuer, "lbcp");
        assert_eq!(config.audience, "lbcp-api");
        assert!(config.secret.is_empty());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AuthConfig {
            secret: "hunter2".into(),
            ..AuthConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn auth_error_status_codes() {
        assert_eq!(AuthError::TokenExpired.http_status_code(), 401);
        assert_eq!(AuthError::InvalidSignature.http_status_code(), 401);
        assert_eq!(AuthError::InvalidAccountId.http_status_code(), 401);
        assert_eq!(AuthError::Internal("x".into()).http_status_code(), 500);
    }

    #[test]
    fn auth_error_retriable() {
        assert!(AuthError::TokenExpired.is_retriable());
        assert!(!AuthError::InvalidSignature.is_retriable());
        assert!(!AuthError::InvalidAudience.is_retriable());
    }
}
