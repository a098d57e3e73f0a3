//! Replication task types and batched message payloads.
//!
//! A source cluster emits an ordered stream of replication tasks per shard;
//! the local processor pulls them in batches and applies them to the history
//! engine in strictly increasing `source_task_id` order.

use crate::error::ReplicationError;
use serde::{Deserialize, Serialize};

/// Kind of replication task emitted by the source cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationTaskType {
    /// Sync one activity's heartbeat/progress state.
    SyncActivity,
    /// Replay a batch of history events (v2 event store).
    HistoryV2,
    /// Advance the per-domain failover version.
    FailoverMarker,
    /// Full workflow mutable-state sync used on reset/recovery.
    SyncWorkflowState,
}

impl ReplicationTaskType {
    /// Short label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncActivity => "sync_activity",
            Self::HistoryV2 => "history_v2",
            Self::FailoverMarker => "failover_marker",
            Self::SyncWorkflowState => "sync_workflow_state",
        }
    }
}

/// Encoding applied to a serialized payload blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingType {
    /// bincode-encoded payload.
    Bincode,
    /// JSON-encoded payload.
    Json,
}

/// An encoded payload with its encoding tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlob {
    /// Encoding of `data`.
    pub encoding: EncodingType,
    /// The serialized bytes.
    pub data: Vec<u8>,
}

impl DataBlob {
    /// Encode a batch of history events as a bincode blob.
    pub fn encode_events(events: &[HistoryEvent]) -> Result<Self, ReplicationError> {
        let data = bincode::serialize(events)?;
        Ok(Self {
            encoding: EncodingType::Bincode,
            data,
        })
    }

    /// Decode the blob back into a batch of history events.
    pub fn decode_events(&self) -> Result<Vec<HistoryEvent>, ReplicationError> {
        match self.encoding {
            EncodingType::Bincode => Ok(bincode::deserialize(&self.data)?),
            EncodingType::Json => Err(ReplicationError::Corruption {
                msg: "history event blobs must be bincode-encoded".to_string(),
            }),
        }
    }
}

/// Minimal projection of a history event carried in a replication blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Position of the event in the workflow history.
    pub event_id: i64,
    /// Failover version the event was written under.
    pub version: i64,
    /// Event timestamp (nanoseconds since epoch).
    pub timestamp: i64,
    /// Event type tag.
    pub event_type: String,
}

/// Attributes for a `SyncActivity` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncActivityTaskAttributes {
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
    /// Started event ID, if the activity has started.
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

/// Attributes for a `HistoryV2` event-replay task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTaskV2Attributes {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Version histories of the sending cluster (branch token + items).
    pub version_histories: Vec<VersionHistoryItem>,
    /// Encoded batch of history events.
    pub events: DataBlob,
    /// Encoded first event batch of the new run, when the task closes one run
    /// and starts another (continue-as-new).
    pub new_run_events: Option<DataBlob>,
}

/// One `(event_id, version)` range boundary in a version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    /// Last event ID written under `version`.
    pub event_id: i64,
    /// Failover version of the range ending at `event_id`.
    pub version: i64,
}

/// Attributes for a `FailoverMarker` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverMarkerAttributes {
    /// Domain the failover applies to.
    pub domain_id: String,
    /// The new failover version.
    pub failover_version: i64,
    /// Marker creation time (nanoseconds since epoch).
    pub creation_time: Option<i64>,
}

/// Attributes for a `SyncWorkflowState` full-state task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWorkflowStateTaskAttributes {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Failover version of the snapshot.
    pub version: i64,
    /// Encoded workflow mutable state snapshot.
    pub state: DataBlob,
}

/// Type-specific payload of a replication task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationTaskAttributes {
    /// Activity state sync.
    SyncActivity(SyncActivityTaskAttributes),
    /// History event replay.
    HistoryV2(HistoryTaskV2Attributes),
    /// Failover version advance.
    FailoverMarker(FailoverMarkerAttributes),
    /// Full mutable-state sync.
    SyncWorkflowState(SyncWorkflowStateTaskAttributes),
}

/// One immutable replication task emitted by the source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// Monotone task ID assigned by the source cluster, per shard.
    pub source_task_id: i64,
    /// Task creation time at the source (nanoseconds since epoch), for lag metrics.
    pub creation_time: Option<i64>,
    /// Type-specific payload.
    pub attributes: ReplicationTaskAttributes,
}

impl ReplicationTask {
    /// The task's type tag.
    pub fn task_type(&self) -> ReplicationTaskType {
        match self.attributes {
            ReplicationTaskAttributes::SyncActivity(_) => ReplicationTaskType::SyncActivity,
            ReplicationTaskAttributes::HistoryV2(_) => ReplicationTaskType::HistoryV2,
            ReplicationTaskAttributes::FailoverMarker(_) => ReplicationTaskType::FailoverMarker,
            ReplicationTaskAttributes::SyncWorkflowState(_) => {
                ReplicationTaskType::SyncWorkflowState
            }
        }
    }

    /// The domain the task belongs to.
    pub fn domain_id(&self) -> &str {
        match &self.attributes {
            ReplicationTaskAttributes::SyncActivity(a) => &a.domain_id,
            ReplicationTaskAttributes::HistoryV2(a) => &a.domain_id,
            ReplicationTaskAttributes::FailoverMarker(a) => &a.domain_id,
            ReplicationTaskAttributes::SyncWorkflowState(a) => &a.domain_id,
        }
    }

    /// The workflow execution the task refers to, if it targets one.
    pub fn execution(&self) -> Option<(&str, &str)> {
        match &self.attributes {
            ReplicationTaskAttributes::SyncActivity(a) => Some((&a.workflow_id, &a.run_id)),
            ReplicationTaskAttributes::HistoryV2(a) => Some((&a.workflow_id, &a.run_id)),
            ReplicationTaskAttributes::FailoverMarker(_) => None,
            ReplicationTaskAttributes::SyncWorkflowState(a) => Some((&a.workflow_id, &a.run_id)),
        }
    }

    /// The failover version carried by the task, if any.
    pub fn failover_version(&self) -> Option<i64> {
        match &self.attributes {
            ReplicationTaskAttributes::SyncActivity(a) => Some(a.version),
            ReplicationTaskAttributes::HistoryV2(a) => {
                a.version_histories.last().map(|item| item.version)
            }
            ReplicationTaskAttributes::FailoverMarker(a) => Some(a.failover_version),
            ReplicationTaskAttributes::SyncWorkflowState(a) => Some(a.version),
        }
    }
}

/// Health signal the source cluster attaches to a reply for one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncShardStatus {
    /// Source-side shard clock (nanoseconds since epoch).
    pub timestamp: Option<i64>,
}

/// A batched reply for one shard from the source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessages {
    /// Tasks ordered by `source_task_id`.
    pub tasks: Vec<ReplicationTask>,
    /// Highest task ID the source read for this shard, applied or not.
    pub last_retrieved_message_id: i64,
    /// True when more data was immediately available at the source.
    pub has_more: bool,
    /// Optional shard health signal.
    pub sync_shard_status: Option<SyncShardStatus>,
}

/// Per-shard read position sent to the source cluster with each fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationToken {
    /// Shard the token describes.
    pub shard_id: i32,
    /// Highest task ID fully handled by the local processor.
    pub last_processed_message_id: i64,
    /// Highest task ID the local processor has seen in a reply.
    pub last_retrieved_message_id: i64,
}
