//! Data-inconsistency repair bridge.
//!
//! When applying a task reveals corrupted or missing replication state that
//! this cluster is authoritative for, the processor signals the
//! check-data-corruption workflow in the system domain. The workflow is
//! signal-driven and dedups by execution tuple, so duplicate triggers are
//! harmless.

use crate::cluster::ClusterMetadata;
use crate::error::ReplicationError;
use crate::frontend::{
    FrontendClient, SignalWithStartWorkflowExecutionRequest, WorkflowIdReusePolicy,
};
use crate::task::ReplicationTask;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// System domain that hosts maintenance workflows.
pub const SYSTEM_LOCAL_DOMAIN: &str = "windlass-system";
/// Workflow ID of the data-corruption checker.
pub const CHECK_DATA_CORRUPTION_WORKFLOW_ID: &str = "check-data-corruption";
/// Workflow type of the data-corruption checker.
pub const CHECK_DATA_CORRUPTION_WORKFLOW_TYPE: &str = "check-data-corruption-workflow";
/// Task list the checker's decisions are dispatched on.
pub const CHECK_DATA_CORRUPTION_TASK_LIST: &str = "check-data-corruption-tasklist";
/// Signal that enqueues one execution for checking.
pub const CHECK_DATA_CORRUPTION_SIGNAL: &str = "check-data-corruption-signal";

/// Execution tuple delivered to the checker workflow as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Domain the workflow belongs to.
    pub domain_id: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Run identifier.
    pub run_id: String,
    /// Shard the execution lives in.
    pub shard_id: i32,
}

/// Starts or signals the checker workflow for executions whose replication
/// state this cluster is responsible for.
#[derive(Clone)]
pub struct RepairTrigger {
    shard_id: i32,
    cluster_metadata: Arc<dyn ClusterMetadata>,
    frontend: Arc<dyn FrontendClient>,
}

impl RepairTrigger {
    /// Create a trigger for one shard.
    pub fn new(
        shard_id: i32,
        cluster_metadata: Arc<dyn ClusterMetadata>,
        frontend: Arc<dyn FrontendClient>,
    ) -> Self {
        Self {
            shard_id,
            cluster_metadata,
            frontend,
        }
    }

    /// Trigger a data-inconsistency scan for the execution `task` refers to.
    ///
    /// No-ops when the task carries no failover version, targets no
    /// execution, or the responsible cluster is remote (the remote cluster
    /// will re-emit the authoritative state).
    pub async fn trigger(&self, task: &ReplicationTask) -> Result<(), ReplicationError> {
        let Some(version) = task.failover_version() else {
            return Ok(());
        };
        let Some((workflow_id, run_id)) = task.execution() else {
            return Ok(());
        };
        let responsible = self
            .cluster_metadata
            .cluster_name_for_failover_version(version)?;
        if responsible != self.cluster_metadata.current_cluster_name() {
            debug!(
                version,
                responsible = %responsible,
                "skipping repair trigger, remote cluster is authoritative"
            );
            return Ok(());
        }

        let execution = Execution {
            domain_id: task.domain_id().to_string(),
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            shard_id: self.shard_id,
        };
        let signal_input =
            serde_json::to_vec(&execution).map_err(|e| ReplicationError::Corruption {
                msg: format!("failed to encode repair signal input: {}", e),
            })?;
        info!(
            shard_id = self.shard_id,
            domain_id = %execution.domain_id,
            workflow_id = %execution.workflow_id,
            "triggering data-inconsistency scan"
        );
        self.frontend
            .signal_with_start_workflow_execution(SignalWithStartWorkflowExecutionRequest {
                domain: SYSTEM_LOCAL_DOMAIN.to_string(),
                workflow_id: CHECK_DATA_CORRUPTION_WORKFLOW_ID.to_string(),
                workflow_type: CHECK_DATA_CORRUPTION_WORKFLOW_TYPE.to_string(),
                task_list: CHECK_DATA_CORRUPTION_TASK_LIST.to_string(),
                signal_name: CHECK_DATA_CORRUPTION_SIGNAL.to_string(),
                signal_input,
                workflow_id_reuse_policy: WorkflowIdReusePolicy::AllowDuplicate,
                request_id: uuid::Uuid::new_v4().to_string(),
            })
            .await
    }
}
