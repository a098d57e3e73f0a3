//! Dead-letter bridge: projecting poisoned tasks into durable DLQ records.

use crate::backoff::RetryPolicy;
use crate::error::ReplicationError;
use crate::store::{ExecutionStore, PutReplicationTaskToDlqRequest, ReplicationTaskInfo};
use crate::task::{ReplicationTask, ReplicationTaskAttributes};
use std::sync::Arc;
use tracing::{error, warn};

/// Project a replication task into its persistence-layer DLQ request.
///
/// For history tasks the event range is derived from the blob head:
/// `next_event_id = first_event_id + event_count`. An empty event batch is
/// corruption, not a zero-length range.
pub fn generate_dlq_request(
    source_cluster: &str,
    task: &ReplicationTask,
) -> Result<PutReplicationTaskToDlqRequest, ReplicationError> {
    let task_info = match &task.attributes {
        ReplicationTaskAttributes::SyncActivity(attrs) => ReplicationTaskInfo {
            task_id: task.source_task_id,
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            task_type: task.task_type(),
            first_event_id: 0,
            next_event_id: 0,
            version: attrs.version,
            scheduled_id: attrs.scheduled_id,
            creation_time: None,
        },
        ReplicationTaskAttributes::HistoryV2(attrs) => {
            let events = attrs.events.decode_events()?;
            let first = events.first().ok_or_else(|| ReplicationError::Corruption {
                msg: "history task carries an empty event batch".to_string(),
            })?;
            ReplicationTaskInfo {
                task_id: task.source_task_id,
                domain_id: attrs.domain_id.clone(),
                workflow_id: attrs.workflow_id.clone(),
                run_id: attrs.run_id.clone(),
                task_type: task.task_type(),
                first_event_id: first.event_id,
                next_event_id: first.event_id + events.len() as i64,
                version: first.version,
                scheduled_id: 0,
                creation_time: None,
            }
        }
        ReplicationTaskAttributes::FailoverMarker(attrs) => ReplicationTaskInfo {
            task_id: task.source_task_id,
            domain_id: attrs.domain_id.clone(),
            workflow_id: String::new(),
            run_id: String::new(),
            task_type: task.task_type(),
            first_event_id: 0,
            next_event_id: 0,
            version: attrs.failover_version,
            scheduled_id: 0,
            creation_time: attrs.creation_time,
        },
        ReplicationTaskAttributes::SyncWorkflowState(attrs) => ReplicationTaskInfo {
            task_id: task.source_task_id,
            domain_id: attrs.domain_id.clone(),
            workflow_id: attrs.workflow_id.clone(),
            run_id: attrs.run_id.clone(),
            task_type: task.task_type(),
            first_event_id: 0,
            next_event_id: 0,
            version: attrs.version,
            scheduled_id: 0,
            creation_time: None,
        },
    };
    Ok(PutReplicationTaskToDlqRequest {
        source_cluster_name: source_cluster.to_string(),
        task_info,
    })
}

/// Writes poisoned tasks to the DLQ with retry. Persistent store failure is
/// fatal: the processor must halt rather than drop the task.
#[derive(Clone)]
pub struct DlqWriter {
    source_cluster: String,
    store: Arc<dyn ExecutionStore>,
    retry_policy: RetryPolicy,
}

impl DlqWriter {
    /// Create a writer for one source cluster.
    pub fn new(
        source_cluster: impl Into<String>,
        store: Arc<dyn ExecutionStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            store,
            retry_policy,
        }
    }

    /// The source cluster this writer records against.
    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    /// Durably record `task` in the DLQ.
    pub async fn put(&self, task: &ReplicationTask) -> Result<(), ReplicationError> {
        let request = generate_dlq_request(&self.source_cluster, task)?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .store
                .put_replication_task_to_dlq(request.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => match self.retry_policy.delay_for(attempt) {
                    Some(delay) => {
                        warn!(
                            source_cluster = %self.source_cluster,
                            task_id = task.source_task_id,
                            attempt,
                            error = %err,
                            "DLQ write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(
                            source_cluster = %self.source_cluster,
                            task_id = task.source_task_id,
                            error = %err,
                            "DLQ write exhausted retries"
                        );
                        return Err(ReplicationError::Fatal {
                            msg: format!("DLQ write failed after {} attempts: {}", attempt, err),
                        });
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}
