//! Key encoding utilities for `RocksDB`.
//!
//! Load balancer keys start with the owning account so that every balancer
//! of an account can be found with a single prefix scan.

use lbcp_core::{AccountId, InstanceId};

/// Separator between a load balancer name and a servo id in index keys.
///
/// Names are restricted to host-label characters so the byte never appears
/// inside one.
const NAME_TERMINATOR: u8 = 0x00;

/// Encode a load balancer key: `account_id || name`.
#[must_use]
pub fn load_balancer_key(account_id: &AccountId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + name.len());
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

/// Encode an account prefix for scanning all load balancers of an account.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the name from a load balancer key.
///
/// Returns `None` if the key is shorter than an account id or the name is
/// not valid UTF-8.
#[must_use]
pub fn extract_name_from_load_balancer_key(key: &[u8]) -> Option<&str> {
    key.get(32..).and_then(|rest| std::str::from_utf8(rest).ok())
}

/// Encode a servo key (just the servo id bytes).
#[must_use]
pub fn servo_key(servo_id: &InstanceId) -> Vec<u8> {
    servo_id.as_str().as_bytes().to_vec()
}

/// Encode a load-balancer-servo index key: `account_id || name || 0x00 || servo_id`.
#[must_use]
pub fn load_balancer_servo_key(account_id: &AccountId, name: &str, servo_id: &InstanceId) -> Vec<u8> {
    let mut key = load_balancer_servo_prefix(account_id, name);
    key.extend_from_slice(servo_id.as_str().as_bytes());
    key
}

/// Encode a prefix for scanning all servos assigned to a load balancer.
#[must_use]
pub fn load_balancer_servo_prefix(account_id: &AccountId, name: &str) -> Vec<u8> {
    let mut key = load_balancer_key(account_id, name);
    key.push(NAME_TERMINATOR);
    key
}

/// Extract the servo id from a load-balancer-servo index key.
///
/// Returns `None` if the key carries no terminator or the suffix is not a
/// well-formed instance id.
#[must_use]
pub fn extract_servo_id_from_index_key(key: &[u8]) -> Option<InstanceId> {
    let suffix = key.get(32..)?;
    let split = suffix.iter().position(|b| *b == NAME_TERMINATOR)?;
    std::str::from_utf8(&suffix[split + 1..])
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_balancer_key_roundtrip() {
        let account = AccountId::from_bytes([1u8; 32]);
        let key = load_balancer_key(&account, "web");
        assert_eq!(key.len(), 35);
        assert!(key.starts_with(&account_prefix(&account)));
        assert_eq!(extract_name_from_load_balancer_key(&key), Some("web"));
    }

    #[test]
    fn servo_index_key_roundtrip() {
        let account = AccountId::from_bytes([1u8; 32]);
        let servo: InstanceId = "i-0a1b2c3d".parse().unwrap();

        let key = load_balancer_servo_key(&account, "web", &servo);
        assert!(key.starts_with(&load_balancer_servo_prefix(&account, "web")));
        assert_eq!(extract_servo_id_from_index_key(&key), Some(servo));
    }

    #[test]
    fn servo_prefix_does_not_match_longer_names() {
        let account = AccountId::from_bytes([1u8; 32]);
        let servo: InstanceId = "i-0a1b2c3d".parse().unwrap();

        let key = load_balancer_servo_key(&account, "web-2", &servo);
        assert!(!key.starts_with(&load_balancer_servo_prefix(&account, "web")));
    }
}
