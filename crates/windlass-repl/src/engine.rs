//! History engine contract: the local state-machine layer replication applies to.
//!
//! The engine materialises state transitions and owns per-workflow
//! serialisation; the replication subsystem only guarantees per-shard task
//! ordering on the way in.

use crate::error::ReplicationError;
use crate::task::{DataBlob, FailoverMarkerAttributes, VersionHistoryItem};
use async_trait::async_trait;

/// Request to sync one activity's progress state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncActivityRequest {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Failover version of the activity state.
    pub version: i64,
    /// Schedule event ID of the activity.
    pub scheduled_id: i64,
    /// Schedule time (nanoseconds since epoch).
    pub scheduled_time: Option<i64>,
    /// Started event ID, if started.
    pub started_id: i64,
    /// Start time (nanoseconds since epoch).
    pub started_time: Option<i64>,
    /// Last heartbeat time (nanoseconds since epoch).
    pub last_heartbeat_time: Option<i64>,
    /// Current attempt count.
    pub attempt: i32,
    /// Opaque heartbeat details.
    pub details: Vec<u8>,
}

/// Request to replay a batch of history events.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateEventsRequest {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Version histories of the sending cluster.
    pub version_histories: Vec<VersionHistoryItem>,
    /// Encoded batch of history events.
    pub events: DataBlob,
    /// First event batch of the continued-as-new run, when present.
    pub new_run_events: Option<DataBlob>,
}

/// Request to overwrite workflow mutable state from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncWorkflowStateRequest {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Failover version of the snapshot.
    pub version: i64,
    /// Encoded mutable-state snapshot.
    pub state: DataBlob,
}

/// Shard health signal forwarded from a source cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncShardStatusRequest {
    /// Cluster that emitted the signal.
    pub source_cluster: String,
    /// Shard the signal describes.
    pub shard_id: i32,
    /// Source-side shard clock (nanoseconds since epoch).
    pub timestamp: Option<i64>,
}

/// Replication entry points of the local history engine.
#[async_trait]
pub trait HistoryEngine: Send + Sync {
    /// Apply an activity progress sync.
    async fn sync_activity(&self, request: SyncActivityRequest) -> Result<(), ReplicationError>;

    /// Replay a batch of history events.
    async fn replicate_events(
        &self,
        request: ReplicateEventsRequest,
    ) -> Result<(), ReplicationError>;

    /// Overwrite workflow mutable state from a snapshot.
    async fn sync_workflow_state(
        &self,
        request: SyncWorkflowStateRequest,
    ) -> Result<(), ReplicationError>;

    /// Advance per-domain failover versions from markers.
    async fn notify_new_failover_markers(
        &self,
        markers: Vec<FailoverMarkerAttributes>,
    ) -> Result<(), ReplicationError>;

    /// Record a source shard's health signal.
    async fn sync_shard_status(
        &self,
        request: SyncShardStatusRequest,
    ) -> Result<(), ReplicationError>;
}
