//! Stateless task executor: dispatches one replication task into the
//! matching history-engine entry point.

use crate::domain::{should_process_task, DomainCache};
use crate::engine::{
    HistoryEngine, ReplicateEventsRequest, SyncActivityRequest, SyncShardStatusRequest,
    SyncWorkflowStateRequest,
};
use crate::error::ReplicationError;
use crate::task::{ReplicationTask, ReplicationTaskAttributes, SyncShardStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Applies replication tasks from one source cluster.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Apply one task. `force_apply` bypasses the domain replication filter
    /// (used when re-driving tasks out of the DLQ).
    async fn execute(
        &self,
        task: &ReplicationTask,
        force_apply: bool,
    ) -> Result<(), ReplicationError>;

    /// Forward a source shard's health signal to the engine.
    async fn handle_sync_shard_status(
        &self,
        status: &SyncShardStatus,
    ) -> Result<(), ReplicationError>;
}

/// Production executor over the local history engine.
pub struct ReplicationTaskExecutor {
    shard_id: i32,
    source_cluster: String,
    local_cluster: String,
    domain_cache: Arc<dyn DomainCache>,
    engine: Arc<dyn HistoryEngine>,
}

impl ReplicationTaskExecutor {
    /// Create an executor for one `(shard, source cluster)` pair.
    pub fn new(
        shard_id: i32,
        source_cluster: impl Into<String>,
        local_cluster: impl Into<String>,
        domain_cache: Arc<dyn DomainCache>,
        engine: Arc<dyn HistoryEngine>,
    ) -> Self {
        Self {
            shard_id,
            source_cluster: source_cluster.into(),
            local_cluster: local_cluster.into(),
            domain_cache,
            engine,
        }
    }

    /// True when the task's domain replicates to this cluster. Unknown and
    /// local-only domains drop the task as a no-op.
    async fn filter_task(&self, domain_id: &str) -> Result<bool, ReplicationError> {
        match self.domain_cache.get_domain_by_id(domain_id).await? {
            Some(entry) => Ok(should_process_task(&entry, &self.local_cluster)),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TaskExecutor for ReplicationTaskExecutor {
    async fn execute(
        &self,
        task: &ReplicationTask,
        force_apply: bool,
    ) -> Result<(), ReplicationError> {
        match &task.attributes {
            ReplicationTaskAttributes::SyncActivity(attrs) => {
                if !force_apply && !self.filter_task(&attrs.domain_id).await? {
                    debug!(
                        domain_id = %attrs.domain_id,
                        task_id = task.source_task_id,
                        "dropping task, domain not replicated here"
                    );
                    return Ok(());
                }
                self.engine
                    .sync_activity(SyncActivityRequest {
                        domain_id: attrs.domain_id.clone(),
                        workflow_id: attrs.workflow_id.clone(),
                        run_id: attrs.run_id.clone(),
                        version: attrs.version,
                        scheduled_id: attrs.scheduled_id,
                        scheduled_time: attrs.scheduled_time,
                        started_id: attrs.started_id,
                        started_time: attrs.started_time,
                        last_heartbeat_time: attrs.last_heartbeat_time,
                        attempt: attrs.attempt,
                        details: attrs.details.clone(),
                    })
                    .await
            }
            ReplicationTaskAttributes::HistoryV2(attrs) => {
                if !force_apply && !self.filter_task(&attrs.domain_id).await? {
                    debug!(
                        domain_id = %attrs.domain_id,
                        task_id = task.source_task_id,
                        "dropping task, domain not replicated here"
                    );
                    return Ok(());
                }
                // Reject undecodable blobs before the engine sees them.
                attrs.events.decode_events()?;
                self.engine
                    .replicate_events(ReplicateEventsRequest {
                        domain_id: attrs.domain_id.clone(),
                        workflow_id: attrs.workflow_id.clone(),
                        run_id: attrs.run_id.clone(),
                        version_histories: attrs.version_histories.clone(),
                        events: attrs.events.clone(),
                        new_run_events: attrs.new_run_events.clone(),
                    })
                    .await
            }
            ReplicationTaskAttributes::FailoverMarker(attrs) => {
                self.engine
                    .notify_new_failover_markers(vec![attrs.clone()])
                    .await
            }
            ReplicationTaskAttributes::SyncWorkflowState(attrs) => {
                if !force_apply && !self.filter_task(&attrs.domain_id).await? {
                    debug!(
                        domain_id = %attrs.domain_id,
                        task_id = task.source_task_id,
                        "dropping task, domain not replicated here"
                    );
                    return Ok(());
                }
                self.engine
                    .sync_workflow_state(SyncWorkflowStateRequest {
                        domain_id: attrs.domain_id.clone(),
                        workflow_id: attrs.workflow_id.clone(),
                        run_id: attrs.run_id.clone(),
                        version: attrs.version,
                        state: attrs.state.clone(),
                    })
                    .await
            }
        }
    }

    async fn handle_sync_shard_status(
        &self,
        status: &SyncShardStatus,
    ) -> Result<(), ReplicationError> {
        let Some(timestamp) = status.timestamp else {
            return Ok(());
        };
        self.engine
            .sync_shard_status(SyncShardStatusRequest {
                source_cluster: self.source_cluster.clone(),
                shard_id: self.shard_id,
                timestamp: Some(timestamp),
            })
            .await
    }
}
