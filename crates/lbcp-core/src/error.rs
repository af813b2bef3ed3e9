//! Common error types for the load balancer control plane.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the control plane.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An invalid load balancer or zone name was provided.
    #[error("invalid name: {0}")]
    InvalidName(#[from] crate::names::NameError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
