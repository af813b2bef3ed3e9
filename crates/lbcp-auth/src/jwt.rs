//! JWT validation and claims extraction.
//!
//! This module provides the core JWT validation logic, including signature
//! verification and claims validation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use lbcp_core::AccountId;

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// Validated claims extracted from a JWT.
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    /// The account ID extracted from the `sub` claim.
    pub account_id: AccountId,
    /// The user within the account, if named.
    pub user: Option<String>,
    /// Whether the caller holds administrator privilege.
    pub administrator: bool,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Trait for validating JWTs.
#[async_trait]
pub trait JwtValidator: Send + Sync {
    /// Validate a JWT and extract claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is invalid, expired, or cannot be validated.
    async fn validate(&self, token: &str) -> Result<ValidatedClaims>;
}

/// Raw claims from a JWT before validation.
#[derive(Debug, Deserialize)]
struct RawClaims {
    /// Subject (`account_id` as hex)
    sub: String,
    /// User name within the account
    #[serde(default)]
    name: Option<String>,
    /// Administrator privilege
    #[serde(default)]
    admin: bool,
    /// Expiration timestamp
    exp: u64,
}

/// Shared-secret (HS256) JWT validator.
pub struct SharedSecretValidator {
    key: DecodingKey,
    validation: Validation,
}

impl SharedSecretValidator {
    /// Create a new validator from the configured secret, issuer and audience.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl JwtValidator for SharedSecretValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let token_data =
            decode::<RawClaims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;

        let account_id =
            AccountId::from_hex(&claims.sub).map_err(|_| AuthError::InvalidAccountId)?;

        let exp_secs = i64::try_from(claims.exp).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(exp_secs, 0)
            .ok_or_else(|| AuthError::InvalidToken("invalid exp timestamp".to_string()))?;

        tracing::trace!(account_id = %account_id, admin = claims.admin, "Validated token");

        Ok(ValidatedClaims {
            account_id,
            user: claims.name,
            administrator: claims.admin,
            expires_at,
        })
    }
}

/// A mock JWT validator for testing.
///
/// This validator accepts any token in the format `test-token:<account_hex>`
/// or `test-token:<account_hex>:admin`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockJwtValidator;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl JwtValidator for MockJwtValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let rest = token.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<account>[:admin]".to_string())
        })?;

        let (account, administrator) = match rest.split_once(':') {
            None => (rest, false),
            Some((account, "admin")) => (account, true),
            Some(_) => {
                return Err(AuthError::InvalidToken(
                    "expected test-token:<account>[:admin]".to_string(),
                ))
            }
        };

        let account_id = AccountId::from_hex(account).map_err(|_| AuthError::InvalidAccountId)?;

        Ok(ValidatedClaims {
            account_id,
            user: None,
            administrator,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        iss: &'a str,
        aud: &'a str,
        sub: String,
        name: Option<&'a str>,
        admin: bool,
        exp: i64,
        iat: i64,
    }

    fn config() -> AuthConfig {
        AuthConfig {
            secret: "test-secret".into(),
            issuer: "lbcp".into(),
            audience: "lbcp-api".into(),
        }
    }

    fn sign(claims: &TestClaims<'_>, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: String) -> TestClaims<'static> {
        let now = Utc::now().timestamp();
        TestClaims {
            iss: "lbcp",
            aud: "lbcp-api",
            sub,
            name: Some("alice"),
            admin: false,
            exp: now + 3600,
            iat: now,
        }
    }

    #[tokio::test]
    async fn validates_signed_token() {
        let account = AccountId::from_bytes([7u8; 32]);
        let token = sign(&claims(account.to_hex()), "test-secret");

        let validated = SharedSecretValidator::new(config())
            .validate(&token)
            .await
            .unwrap();
        assert_eq!(validated.account_id, account);
        assert_eq!(validated.user.as_deref(), Some("alice"));
        assert!(!validated.administrator);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let token = sign(&claims(AccountId::from_bytes([7u8; 32]).to_hex()), "other");
        let result = SharedSecretValidator::new(config()).validate(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let mut c = claims(AccountId::from_bytes([7u8; 32]).to_hex());
        c.exp = Utc::now().timestamp() - 3600;
        let token = sign(&c, "test-secret");

        let result = SharedSecretValidator::new(config()).validate(&token).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let mut c = claims(AccountId::from_bytes([7u8; 32]).to_hex());
        c.aud = "someone-else";
        let token = sign(&c, "test-secret");

        let result = SharedSecretValidator::new(config()).validate(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidAudience)));
    }

    #[tokio::test]
    async fn rejects_malformed_subject() {
        let token = sign(&claims("not-hex".into()), "test-secret");
        let result = SharedSecretValidator::new(config()).validate(&token).await;
        assert!(matches!(result, Err(AuthError::InvalidAccountId)));
    }

    #[tokio::test]
    async fn mock_validator_works() {
        let account = AccountId::from_bytes([1u8; 32]);

        let claims = MockJwtValidator
            .validate(&format!("test-token:{account}"))
            .await
            .unwrap();
        assert_eq!(claims.account_id, account);
        assert!(!claims.administrator);

        let claims = MockJwtValidator
            .validate(&format!("test-token:{account}:admin"))
            .await
            .unwrap();
        assert!(claims.administrator);
    }

    #[tokio::test]
    async fn mock_validator_rejects_invalid() {
        assert!(MockJwtValidator.validate("invalid-token").await.is_err());
        assert!(MockJwtValidator.validate("test-token:nothex").await.is_err());
    }
}
