//! DNS name allocation for load balancers.

use async_trait::async_trait;
use lbcp_core::AccountId;
use lbcp_store::DnsRecord;

/// Longest fully qualified name accepted by resolvers.
const MAX_FQDN_LEN: usize = 253;

/// Error returned when no usable DNS name could be allocated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dns allocation failed: {0}")]
pub struct DnsError(pub String);

/// Trait for allocating DNS records.
#[async_trait]
pub trait DnsProvisioner: Send + Sync {
    /// Allocate a record for a new load balancer.
    ///
    /// Every call returns a name that was never handed out before.
    ///
    /// # Errors
    ///
    /// Returns a `DnsError` if no usable name could be produced.
    async fn allocate(&self, account_id: &AccountId, name: &str) -> Result<DnsRecord, DnsError>;
}

/// Allocates names of the form `<name>-<suffix>.<domain>`.
///
/// The suffix is derived from the owner, the name and the allocation time,
/// so re-creating a balancer with the same name yields a different record.
#[derive(Debug, Clone)]
pub struct DomainDnsProvisioner {
    domain: String,
}

impl DomainDnsProvisioner {
    /// Create a provisioner for the given parent domain.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().trim_matches('.').to_ascii_lowercase(),
        }
    }

    /// The parent domain names are allocated under.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

#[async_trait]
impl DnsProvisioner for DomainDnsProvisioner {
    async fn allocate(&self, account_id: &AccountId, name: &str) -> Result<DnsRecord, DnsError> {
        if self.domain.is_empty() {
            return Err(DnsError("no parent domain configured".to_string()));
        }

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(account_id.as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&nanos.to_le_bytes());
        let suffix = hex::encode(&hasher.finalize().as_bytes()[..6]);

        let fqdn = format!("{}-{suffix}.{}", name.to_ascii_lowercase(), self.domain);
        if fqdn.len() > MAX_FQDN_LEN {
            return Err(DnsError(format!("name too long: {fqdn}")));
        }

        tracing::debug!(account_id = %account_id, fqdn = %fqdn, "Allocated DNS name");
        Ok(DnsRecord { fqdn })
    }
}
