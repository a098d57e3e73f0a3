//! System-frontend contract used to start or signal repair workflows.

use crate::error::ReplicationError;
use async_trait::async_trait;

/// Policy applied when a workflow ID is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowIdReusePolicy {
    /// Start regardless of any previous run's outcome.
    AllowDuplicate,
    /// Start only when the previous run failed.
    AllowDuplicateFailedOnly,
    /// Never start a second run with the same ID.
    RejectDuplicate,
}

/// Request to signal a workflow, starting it first when it is not running.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalWithStartWorkflowExecutionRequest {
    /// Domain to run the workflow in.
    pub domain: String,
    /// Workflow identifier.
    pub workflow_id: String,
    /// Workflow type name.
    pub workflow_type: String,
    /// Task list the workflow's decisions are dispatched on.
    pub task_list: String,
    /// Signal to deliver.
    pub signal_name: String,
    /// Serialized signal payload.
    pub signal_input: Vec<u8>,
    /// Reuse policy applied when starting.
    pub workflow_id_reuse_policy: WorkflowIdReusePolicy,
    /// Idempotency key for the start.
    pub request_id: String,
}

/// Frontend API of the local cluster, scoped to what replication needs.
#[async_trait]
pub trait FrontendClient: Send + Sync {
    /// Signal a workflow, starting it when absent.
    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<(), ReplicationError>;
}
