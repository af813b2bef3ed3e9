//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Load balancer aggregates, keyed by `account_id || name`.
    pub const LOAD_BALANCERS: &str = "load_balancers";

    /// Servo agent records, keyed by `servo_id`.
    pub const SERVO_INSTANCES: &str = "servo_instances";

    /// Index: servos by assigned load balancer, keyed by
    /// `account_id || name || 0x00 || servo_id`.
    pub const SERVOS_BY_LOAD_BALANCER: &str = "servos_by_load_balancer";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::LOAD_BALANCERS,
        cf::SERVO_INSTANCES,
        cf::SERVOS_BY_LOAD_BALANCER,
    ]
}
