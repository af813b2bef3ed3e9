//! Backend target resolution.
//!
//! Registering a target needs the address and zone the servo agents will
//! route to. Those come from the compute inventory, consumed through
//! [`InstanceResolver`].

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use lbcp_core::InstanceId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Where a compute instance lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLocation {
    /// Private address traffic is forwarded to.
    pub ip_address: IpAddr,
    /// Availability zone of the instance.
    pub zone: String,
}

/// Trait for looking up compute instances.
#[async_trait]
pub trait InstanceResolver: Send + Sync {
    /// Locate an instance. Returns `None` if the inventory does not know it.
    async fn resolve(&self, instance_id: &InstanceId) -> Option<InstanceLocation>;
}

/// An in-memory inventory fed by the compute service.
#[derive(Debug, Default)]
pub struct StaticInstanceResolver {
    instances: RwLock<HashMap<InstanceId, InstanceLocation>>,
}

impl StaticInstanceResolver {
    /// Create an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace an instance's location.
    pub fn insert(&self, instance_id: InstanceId, location: InstanceLocation) {
        tracing::debug!(instance_id = %instance_id, zone = %location.zone, "Recorded instance location");
        self.instances.write().insert(instance_id, location);
    }

    /// Forget an instance. Returns true if it was known.
    pub fn remove(&self, instance_id: &InstanceId) -> bool {
        self.instances.write().remove(instance_id).is_some()
    }

    /// Number of known instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Returns true if no instance is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[async_trait]
impl InstanceResolver for StaticInstanceResolver {
    async fn resolve(&self, instance_id: &InstanceId) -> Option<InstanceLocation> {
        self.instances.read().get(instance_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_instances() {
        let inventory = StaticInstanceResolver::new();
        let id: InstanceId = "i-0000000a".parse().unwrap();
        assert!(inventory.resolve(&id).await.is_none());

        inventory.insert(
            id.clone(),
            InstanceLocation {
                ip_address: "10.0.1.4".parse().unwrap(),
                zone: "zone-a".into(),
            },
        );
        assert_eq!(inventory.resolve(&id).await.unwrap().zone, "zone-a");
        assert_eq!(inventory.len(), 1);

        assert!(inventory.remove(&id));
        assert!(inventory.is_empty());
    }
}
