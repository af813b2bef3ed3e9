//! `RocksDB` storage layer for the load balancer control plane.
//!
//! This crate provides persistent storage for load balancer aggregates and
//! servo agent records using `RocksDB` with column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `load_balancers`: Aggregates keyed by `account_id || name`
//! - `servo_instances`: Servo agent records keyed by `servo_id`
//! - `servos_by_load_balancer`: Index for listing the servos of a balancer
//!
//! Every mutation of a load balancer is a read-modify-write performed under
//! a lock stripe chosen by the owning account and committed as a single
//! write batch. Nothing is written unless the aggregate's invariants hold.
//!
//! # Example
//!
//! ```no_run
//! use lbcp_store::{RocksStore, Store};
//! use lbcp_core::AccountId;
//!
//! let store = RocksStore::open("/tmp/lbcp-db").unwrap();
//!
//! let account = AccountId::from_bytes([0u8; 32]);
//! let balancers = store.list_load_balancers_by_account(&account).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    BackendInstance, BackendState, DnsRecord, HealthCheck, Listener, LoadBalancer, Protocol,
    SecurityGroupRef, ServoInstance, UnknownProtocol, Zone, ZoneAssignment, ZoneState,
};

use lbcp_core::{AccountId, InstanceId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Load Balancer Operations
    // =========================================================================

    /// Insert a new load balancer.
    ///
    /// `admit` receives the number of balancers the account already owns and
    /// decides whether one more may be created. The existence check, the
    /// count and the insert happen atomically with respect to other writers
    /// for the same account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the name is taken within the
    /// account, or `StoreError::AdmissionDenied` if `admit` returns false.
    fn allocate_load_balancer(&self, lb: &LoadBalancer, admit: &dyn Fn(u32) -> bool)
        -> Result<()>;

    /// Get a load balancer by owner and name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such balancer exists.
    fn get_load_balancer(&self, account_id: &AccountId, name: &str) -> Result<LoadBalancer>;

    /// Find every load balancer with the given name, across all accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_load_balancers_by_name(&self, name: &str) -> Result<Vec<LoadBalancer>>;

    /// List all load balancers owned by an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_load_balancers_by_account(&self, account_id: &AccountId) -> Result<Vec<LoadBalancer>>;

    /// Count load balancers owned by an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_load_balancers_by_account(&self, account_id: &AccountId) -> Result<u32>;

    /// List all load balancers in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_load_balancers(&self) -> Result<Vec<LoadBalancer>>;

    /// Apply `mutate` to a load balancer and persist the result.
    ///
    /// The closure runs exactly once against a copy of the stored aggregate.
    /// If it fails, or the mutated aggregate violates an invariant, nothing
    /// is written. On success `updated_at` is refreshed and the new aggregate
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the balancer doesn't exist, the
    /// closure's error if it fails, or `StoreError::Invariant` if the result
    /// is invalid.
    fn update_load_balancer(
        &self,
        account_id: &AccountId,
        name: &str,
        mutate: &mut dyn FnMut(&mut LoadBalancer) -> Result<()>,
    ) -> Result<LoadBalancer>;

    /// Delete a load balancer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the balancer doesn't exist.
    fn delete_load_balancer(&self, account_id: &AccountId, name: &str) -> Result<()>;

    // =========================================================================
    // Servo Operations
    // =========================================================================

    /// Insert or update a servo agent record.
    ///
    /// This also maintains the load balancer index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_servo_instance(&self, servo: &ServoInstance) -> Result<()>;

    /// Get a servo agent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_servo_instance(&self, servo_id: &InstanceId) -> Result<Option<ServoInstance>>;

    /// Delete a servo agent record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the servo doesn't exist.
    fn delete_servo_instance(&self, servo_id: &InstanceId) -> Result<()>;

    /// List the servo agents assigned to a load balancer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servos_by_load_balancer(
        &self,
        account_id: &AccountId,
        name: &str,
    ) -> Result<Vec<ServoInstance>>;

    /// Detach every servo agent from a load balancer.
    ///
    /// Servo records are kept; only their assignment is cleared. Returns the
    /// number of servos detached. Calling this on a balancer with no servos
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn unlink_servos(&self, account_id: &AccountId, name: &str) -> Result<u32>;
}
