//! Name validation for load balancers and availability zones.
//!
//! A load balancer name becomes the leftmost label of its DNS name, so it
//! must be a valid host label on its own.

/// Maximum length of a load balancer name.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of an availability zone name.
const MAX_ZONE_LEN: usize = 64;

/// Errors returned by name validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The name was empty.
    #[error("name must not be empty")]
    Empty,

    /// The name exceeded the maximum length.
    #[error("name is too long: at most {max} characters, got {got}")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        got: usize,
    },

    /// The name contained a character that is not allowed in a host label.
    #[error("Invalid character found in the loadbalancer name")]
    InvalidCharacter,

    /// The zone name was not well formed.
    #[error("invalid zone name: {0}")]
    InvalidZone(String),
}

/// Validate a load balancer name.
///
/// Names are 1 to [`MAX_NAME_LEN`] ASCII alphanumerics or hyphens and may
/// not begin or end with a hyphen.
///
/// # Errors
///
/// Returns a [`NameError`] describing the first violated rule.
pub fn validate_load_balancer_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if !is_host_label(name) {
        return Err(NameError::InvalidCharacter);
    }
    Ok(())
}

/// Validate an availability zone name.
///
/// Zone names follow the same host-label shape as load balancer names but
/// are lowercase only.
///
/// # Errors
///
/// Returns [`NameError::InvalidZone`] if the name is malformed.
pub fn validate_zone_name(zone: &str) -> Result<(), NameError> {
    let lowercase = zone.bytes().all(|b| !b.is_ascii_uppercase());
    if zone.is_empty() || zone.len() > MAX_ZONE_LEN || !lowercase || !is_host_label(zone) {
        return Err(NameError::InvalidZone(zone.to_string()));
    }
    Ok(())
}

fn is_host_label(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}
