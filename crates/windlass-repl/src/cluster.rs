//! Cluster metadata: routing failover versions to the cluster that owns them.
//!
//! Each cluster in the replication group is assigned a distinct initial
//! failover version below a shared increment. Every failover bumps a domain's
//! version by the increment, so `version % increment` always recovers the
//! initial version of the cluster that performed the failover.

use crate::error::ReplicationError;
use std::collections::HashMap;

/// Read-only view of the replication cluster group.
pub trait ClusterMetadata: Send + Sync {
    /// Name of the cluster this process runs in.
    fn current_cluster_name(&self) -> &str;

    /// Name of the cluster responsible for the given failover version.
    fn cluster_name_for_failover_version(&self, version: i64)
        -> Result<String, ReplicationError>;
}

/// Cluster metadata backed by a static configuration table.
#[derive(Debug, Clone)]
pub struct StaticClusterMetadata {
    current_cluster: String,
    failover_version_increment: i64,
    initial_versions: HashMap<i64, String>,
}

impl StaticClusterMetadata {
    /// Build metadata from the current cluster name, the failover version
    /// increment, and each cluster's initial failover version.
    pub fn new(
        current_cluster: impl Into<String>,
        failover_version_increment: i64,
        clusters: impl IntoIterator<Item = (String, i64)>,
    ) -> Self {
        let initial_versions = clusters
            .into_iter()
            .map(|(name, initial)| (initial, name))
            .collect();
        Self {
            current_cluster: current_cluster.into(),
            failover_version_increment,
            initial_versions,
        }
    }

    /// All cluster names in the group, current cluster included.
    pub fn all_cluster_names(&self) -> impl Iterator<Item = &str> {
        self.initial_versions.values().map(String::as_str)
    }

    /// Remote cluster names (the group minus the current cluster).
    pub fn remote_cluster_names(&self) -> Vec<String> {
        self.initial_versions
            .values()
            .filter(|name| **name != self.current_cluster)
            .cloned()
            .collect()
    }
}

impl ClusterMetadata for StaticClusterMetadata {
    fn current_cluster_name(&self) -> &str {
        &self.current_cluster
    }

    fn cluster_name_for_failover_version(
        &self,
        version: i64,
    ) -> Result<String, ReplicationError> {
        if version < 0 {
            return Err(ReplicationError::UnknownFailoverVersion { version });
        }
        let initial = version % self.failover_version_increment;
        self.initial_versions
            .get(&initial)
            .cloned()
            .ok_or(ReplicationError::UnknownFailoverVersion { version })
    }
}
