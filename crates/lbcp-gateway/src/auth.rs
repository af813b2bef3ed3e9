//! Authentication extractors.
//!
//! This module provides the `AuthUser` extractor that validates bearer
//! tokens and maps them onto control plane principals.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use lbcp_auth::{JwtValidator, ValidatedClaims};
use lbcp_control::{ControlPlane, Principal};
use lbcp_core::AccountId;

use crate::error::ApiError;
use crate::state::GatewayState;

/// An authenticated caller extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The account the caller acts for.
    pub account_id: AccountId,
    /// The user within the account, if named in the token.
    pub user: Option<String>,
    /// Whether the caller holds administrator privilege.
    pub administrator: bool,
}

impl AuthUser {
    /// Create an `AuthUser` from validated claims.
    #[must_use]
    pub fn from_claims(claims: &ValidatedClaims) -> Self {
        Self {
            account_id: claims.account_id,
            user: claims.user.clone(),
            administrator: claims.administrator,
        }
    }

    /// The control plane principal for this caller.
    #[must_use]
    pub fn principal(&self) -> Principal {
        let mut principal = if self.administrator {
            Principal::administrator(self.account_id)
        } else {
            Principal::account(self.account_id)
        };
        principal.user.clone_from(&self.user);
        principal
    }

    /// The principal for an administrator-only endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` unless the caller holds administrator privilege.
    pub fn require_administrator(&self) -> Result<Principal, ApiError> {
        if !self.administrator {
            tracing::warn!(
                account_id = %self.account_id,
                "Non-administrator called internal endpoint"
            );
            return Err(ApiError::Forbidden);
        }
        Ok(self.principal())
    }
}

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for AuthUser
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = state.jwt_validator.validate(token).await?;

        Ok(Self::from_claims(&claims))
    }
}
