//! Persistence contracts: DLQ writes and per-shard replication progress.

use crate::error::ReplicationError;
use crate::task::ReplicationTaskType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persistence-layer projection of a replication task, as stored in the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTaskInfo {
    /// The task's `source_task_id`.
    pub task_id: i64,
    /// Domain the task belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Task type tag.
    pub task_type: ReplicationTaskType,
    /// First event ID of a history batch (history tasks only).
    pub first_event_id: i64,
    /// One past the last event ID of a history batch (history tasks only).
    pub next_event_id: i64,
    /// Failover version carried by the task.
    pub version: i64,
    /// Schedule event ID (activity tasks only).
    pub scheduled_id: i64,
    /// Task creation time at the source (failover markers only).
    pub creation_time: Option<i64>,
}

/// Request to persist one poisoned task in the DLQ.
#[derive(Debug, Clone, PartialEq)]
pub struct PutReplicationTaskToDlqRequest {
    /// Cluster the task came from.
    pub source_cluster_name: String,
    /// Projected task record.
    pub task_info: ReplicationTaskInfo,
}

/// Execution persistence surface used by the DLQ bridge.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Durably record a task that could not be applied.
    async fn put_replication_task_to_dlq(
        &self,
        request: PutReplicationTaskToDlqRequest,
    ) -> Result<(), ReplicationError>;
}

/// Shard-scoped persistence for replication progress watermarks.
#[async_trait]
pub trait ShardStateStore: Send + Sync {
    /// Last processed task ID for `(shard, source cluster)`, `None` when the
    /// shard has never consumed from this source.
    async fn get_cluster_replication_level(
        &self,
        shard_id: i32,
        cluster: &str,
    ) -> Result<Option<i64>, ReplicationError>;

    /// Persist the last processed task ID for `(shard, source cluster)`.
    /// The source cluster reads this level to garbage-collect its queue.
    async fn update_cluster_replication_level(
        &self,
        shard_id: i32,
        cluster: &str,
        level: i64,
    ) -> Result<(), ReplicationError>;

    /// The shard's own replication ack level, aggregated across every source
    /// cluster; `None` when the shard has never flushed.
    async fn get_replication_ack_level(
        &self,
        shard_id: i32,
    ) -> Result<Option<i64>, ReplicationError>;

    /// Persist the shard's own replication ack level.
    async fn update_replication_ack_level(
        &self,
        shard_id: i32,
        level: i64,
    ) -> Result<(), ReplicationError>;

    /// Delete locally buffered replication tasks with IDs below `below`;
    /// they are acknowledged everywhere and will never be re-read.
    async fn purge_acked_replication_tasks(
        &self,
        shard_id: i32,
        below: i64,
    ) -> Result<(), ReplicationError>;
}
