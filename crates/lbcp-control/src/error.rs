//! Error types for the control plane.
//!
//! Access-filter denials are reported as [`ControlError::LoadBalancerNotFound`]
//! so that callers cannot probe for balancers owned by other accounts.

use lbcp_core::AccountId;
use lbcp_store::StoreError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested load balancer was not found, or the caller may not see it.
    #[error("load balancer not found: {0}")]
    LoadBalancerNotFound(String),

    /// The account may not create more load balancers.
    #[error("load balancer quota exceeded for account {account_id}")]
    QuotaExceeded {
        /// The account that exceeded the quota.
        account_id: AccountId,
    },

    /// A load balancer with the same name already exists in the account.
    #[error("load balancer already exists: {0}")]
    AlreadyExists(String),

    /// The request was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The data plane could not be notified of a desired state change.
    #[error("{context}: {reason}")]
    DispatchFailed {
        /// What the command was doing.
        context: String,
        /// Why dispatch failed.
        reason: String,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Map a store error raised while operating on the named load balancer.
    ///
    /// `NotFound` becomes [`ControlError::LoadBalancerNotFound`], rejected or
    /// invalid mutations become [`ControlError::InvalidArgument`].
    #[must_use]
    pub fn from_store(name: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::LoadBalancerNotFound(name.to_string()),
            StoreError::AlreadyExists => Self::AlreadyExists(name.to_string()),
            StoreError::Rejected(msg) | StoreError::Invariant(msg) => Self::InvalidArgument(msg),
            other => Self::Store(other),
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::LoadBalancerNotFound(_) => 404,
            Self::QuotaExceeded { .. } => 429,
            Self::AlreadyExists(_) => 409,
            Self::InvalidArgument(_) => 400,
            Self::DispatchFailed { .. } => 502,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::DispatchFailed { .. } | Self::Store(_) | Self::Internal(_)
        )
    }
}

impl From<lbcp_core::CoreError> for ControlError {
    fn from(err: lbcp_core::CoreError) -> Self {
        match err {
            lbcp_core::CoreError::Internal(msg) => Self::Internal(msg),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

impl From<lbcp_core::IdError> for ControlError {
    fn from(err: lbcp_core::IdError) -> Self {
        lbcp_core::CoreError::from(err).into()
    }
}

impl From<lbcp_core::NameError> for ControlError {
    fn from(err: lbcp_core::NameError) -> Self {
        lbcp_core::CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let account_id = AccountId::from_bytes([2u8; 32]);

        assert_eq!(
            ControlError::LoadBalancerNotFound("web".into()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::QuotaExceeded { account_id }.http_status_code(),
            429
        );
        assert_eq!(ControlError::AlreadyExists("web".into()).http_status_code(), 409);
        assert_eq!(ControlError::InvalidArgument("x".into()).http_status_code(), 400);
        assert_eq!(
            ControlError::DispatchFailed {
                context: "Failed to enable zones".into(),
                reason: "internal error".into(),
            }
            .http_status_code(),
            502
        );
    }

    #[test]
    fn dispatch_failure_message() {
        let err = ControlError::DispatchFailed {
            context: "Failed to create the loadbalancer".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to create the loadbalancer: connection refused"
        );
        assert!(err.is_retriable());
    }

    #[test]
    fn store_errors_map_by_kind() {
        assert!(matches!(
            ControlError::from_store("web", StoreError::NotFound),
            ControlError::LoadBalancerNotFound(name) if name == "web"
        ));
        assert!(matches!(
            ControlError::from_store("web", StoreError::Invariant("dup".into())),
            ControlError::InvalidArgument(_)
        ));
        assert!(matches!(
            ControlError::from_store("web", StoreError::Database("io".into())),
            ControlError::Store(_)
        ));
    }

    #[test]
    fn name_errors_are_invalid_arguments() {
        let err: ControlError = lbcp_core::validate_load_balancer_name("-x").unwrap_err().into();
        assert!(matches!(err, ControlError::InvalidArgument(msg) if msg.contains("Invalid character")));
    }
}
