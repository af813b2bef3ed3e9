//! Core types and utilities for the load balancer control plane.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: Strongly-typed IDs for accounts and compute instances
//! - **Names**: Validation of load balancer names and zone names
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use lbcp_core::{AccountId, InstanceId, validate_load_balancer_name};
//!
//! let account = AccountId::from_hex(
//!     "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
//! ).unwrap();
//!
//! let instance: InstanceId = "i-0a1b2c3d".parse().unwrap();
//! assert_eq!(instance.as_str(), "i-0a1b2c3d");
//!
//! assert!(validate_load_balancer_name("web-frontend").is_ok());
//! assert!(validate_load_balancer_name("-bad").is_err());
//! # let _ = account;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod names;

pub use error::{CoreError, Result};
pub use ids::{AccountId, IdError, InstanceId};
pub use names::{validate_load_balancer_name, validate_zone_name, NameError, MAX_NAME_LEN};
