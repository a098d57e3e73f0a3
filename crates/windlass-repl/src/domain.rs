//! Domain cache contract and the replication domain filter.

use crate::error::ReplicationError;
use async_trait::async_trait;

/// Cached registration record for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEntry {
    /// Domain identifier.
    pub id: String,
    /// Human-readable domain name.
    pub name: String,
    /// True when the domain is registered in more than one cluster.
    pub is_global: bool,
    /// Clusters the domain replicates to.
    pub replication_clusters: Vec<String>,
    /// Current failover version of the domain.
    pub failover_version: i64,
}

/// Read-through cache over the domain metadata store.
#[async_trait]
pub trait DomainCache: Send + Sync {
    /// Look up a domain by ID. `None` when the domain is not registered locally.
    async fn get_domain_by_id(
        &self,
        domain_id: &str,
    ) -> Result<Option<DomainEntry>, ReplicationError>;
}

/// Returns true when a replication task for `entry` should be applied in
/// `local_cluster`. Local-only domains and domains that do not replicate to
/// this cluster are dropped as no-ops.
pub fn should_process_task(entry: &DomainEntry, local_cluster: &str) -> bool {
    if !entry.is_global {
        return false;
    }
    entry
        .replication_clusters
        .iter()
        .any(|cluster| cluster == local_cluster)
}
