//! Per-shard context shared by the replication components of one shard.

use crate::config::ReplicationConfig;
use crate::error::ReplicationError;
use crate::store::ShardStateStore;
use std::sync::Arc;
use tracing::debug;

/// Initial watermark used when a shard has never consumed from a source.
pub const NO_MESSAGE_ID: i64 = -1;

/// Identity and persisted state of one shard, created at shard-acquire time
/// and torn down at shard-release.
#[derive(Clone)]
pub struct ShardContext {
    shard_id: i32,
    local_cluster: String,
    store: Arc<dyn ShardStateStore>,
    config: Arc<ReplicationConfig>,
}

impl ShardContext {
    /// Create a context for one owned shard.
    pub fn new(
        shard_id: i32,
        local_cluster: impl Into<String>,
        store: Arc<dyn ShardStateStore>,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        Self {
            shard_id,
            local_cluster: local_cluster.into(),
            store,
            config,
        }
    }

    /// The shard's identifier.
    pub fn shard_id(&self) -> i32 {
        self.shard_id
    }

    /// Name of the local cluster.
    pub fn local_cluster(&self) -> &str {
        &self.local_cluster
    }

    /// The replication configuration for this shard.
    pub fn config(&self) -> &Arc<ReplicationConfig> {
        &self.config
    }

    /// Load the persisted watermark for `source_cluster`, [`NO_MESSAGE_ID`]
    /// when the shard has never consumed from it.
    ///
    /// The per-source level is the resume point: the shard-wide ack level
    /// aggregates every source and may be ahead of a lagging one, so it is
    /// never used to seed a `(shard, source)` processor.
    pub async fn replication_level(
        &self,
        source_cluster: &str,
    ) -> Result<i64, ReplicationError> {
        let level = self
            .store
            .get_cluster_replication_level(self.shard_id, source_cluster)
            .await?
            .unwrap_or(NO_MESSAGE_ID);
        debug!(shard_id = self.shard_id, source_cluster, level, "loaded replication level");
        Ok(level)
    }

    /// The shard's persisted ack level across every source,
    /// [`NO_MESSAGE_ID`] when the shard has never flushed.
    pub async fn replication_ack_level(&self) -> Result<i64, ReplicationError> {
        Ok(self
            .store
            .get_replication_ack_level(self.shard_id)
            .await?
            .unwrap_or(NO_MESSAGE_ID))
    }

    /// Persist the processed watermark for `source_cluster` and purge acked
    /// tasks. Called by the processor's flusher, never by the apply path.
    pub async fn flush_replication_level(
        &self,
        source_cluster: &str,
        last_processed: i64,
    ) -> Result<(), ReplicationError> {
        if last_processed == NO_MESSAGE_ID {
            return Ok(());
        }
        self.store
            .update_cluster_replication_level(self.shard_id, source_cluster, last_processed)
            .await?;
        // Several `(shard, source)` flushers feed the shard-wide ack level;
        // read it back and only ever move it forward.
        let current_ack = self.replication_ack_level().await?;
        if last_processed > current_ack {
            self.store
                .update_replication_ack_level(self.shard_id, last_processed)
                .await?;
        }
        self.store
            .purge_acked_replication_tasks(self.shard_id, last_processed)
            .await
    }
}

impl std::fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardContext")
            .field("shard_id", &self.shard_id)
            .field("local_cluster", &self.local_cluster)
            .finish_non_exhaustive()
    }
}
