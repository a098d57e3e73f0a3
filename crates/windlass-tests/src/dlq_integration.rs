//! DLQ projection and repair-trigger scenarios.

use crate::harness::*;
use std::sync::Arc;
use uuid::Uuid;
use windlass_repl::cluster::StaticClusterMetadata;
use windlass_repl::dlq::generate_dlq_request;
use windlass_repl::error::ReplicationError;
use windlass_repl::frontend::WorkflowIdReusePolicy;
use windlass_repl::repair::{
    Execution, RepairTrigger, CHECK_DATA_CORRUPTION_SIGNAL, CHECK_DATA_CORRUPTION_TASK_LIST,
    CHECK_DATA_CORRUPTION_WORKFLOW_ID, CHECK_DATA_CORRUPTION_WORKFLOW_TYPE, SYSTEM_LOCAL_DOMAIN,
};
use windlass_repl::task::{
    HistoryEvent, ReplicationTask, ReplicationTaskAttributes, ReplicationTaskType,
    SyncActivityTaskAttributes,
};

#[test]
fn test_dlq_request_for_sync_activity_preserves_identifiers() {
    let domain_id = Uuid::new_v4().to_string();
    let workflow_id = Uuid::new_v4().to_string();
    let run_id = Uuid::new_v4().to_string();
    let task = ReplicationTask {
        source_task_id: 33,
        creation_time: None,
        attributes: ReplicationTaskAttributes::SyncActivity(SyncActivityTaskAttributes {
            domain_id: domain_id.clone(),
            workflow_id: workflow_id.clone(),
            run_id: run_id.clone(),
            version: 0,
            scheduled_id: 1,
            scheduled_time: None,
            started_id: 0,
            started_time: None,
            last_heartbeat_time: None,
            attempt: 0,
            details: vec![],
        }),
    };

    let request = generate_dlq_request("standby", &task).unwrap();
    assert_eq!(request.source_cluster_name, "standby");
    assert_eq!(request.task_info.domain_id, domain_id);
    assert_eq!(request.task_info.workflow_id, workflow_id);
    assert_eq!(request.task_info.run_id, run_id);
    assert_eq!(request.task_info.scheduled_id, 1);
    assert_eq!(request.task_info.task_type, ReplicationTaskType::SyncActivity);
}

#[test]
fn test_dlq_request_for_history_derives_event_range() {
    let task = history_task(
        34,
        &[HistoryEvent {
            event_id: 1,
            version: 1,
            timestamp: 0,
            event_type: "WorkflowExecutionStarted".to_string(),
        }],
    );
    let request = generate_dlq_request("standby", &task).unwrap();
    assert_eq!(request.source_cluster_name, "standby");
    assert_eq!(request.task_info.first_event_id, 1);
    assert_eq!(request.task_info.next_event_id, 2);
    assert_eq!(request.task_info.version, 1);
    assert_eq!(request.task_info.task_type, ReplicationTaskType::HistoryV2);
}

#[test]
fn test_dlq_request_rejects_empty_history_batch() {
    let task = history_task(35, &[]);
    let err = generate_dlq_request("standby", &task).unwrap_err();
    assert!(err.is_corruption());
}

#[tokio::test]
async fn test_repair_trigger_signals_checker_with_execution_json() {
    let env = TestEnv::new();
    let metadata = Arc::new(StaticClusterMetadata::new(
        "active",
        10,
        vec![("active".to_string(), 0), ("standby".to_string(), 1)],
    ));
    let trigger = RepairTrigger::new(0, metadata, env.frontend.clone());

    // version 100 -> initial version 0 -> "active", the local cluster.
    trigger.trigger(&sync_activity_task(36, 100)).await.unwrap();

    let signals = env.frontend.signals();
    assert_eq!(signals.len(), 1);
    let signal = &signals[0];
    assert_eq!(signal.domain, SYSTEM_LOCAL_DOMAIN);
    assert_eq!(signal.workflow_id, CHECK_DATA_CORRUPTION_WORKFLOW_ID);
    assert_eq!(signal.workflow_type, CHECK_DATA_CORRUPTION_WORKFLOW_TYPE);
    assert_eq!(signal.task_list, CHECK_DATA_CORRUPTION_TASK_LIST);
    assert_eq!(signal.signal_name, CHECK_DATA_CORRUPTION_SIGNAL);
    assert_eq!(signal.workflow_id_reuse_policy, WorkflowIdReusePolicy::AllowDuplicate);
    let execution: Execution = serde_json::from_slice(&signal.signal_input).unwrap();
    assert_eq!(
        execution,
        Execution {
            domain_id: "d".to_string(),
            workflow_id: "w".to_string(),
            run_id: "r".to_string(),
            shard_id: 0,
        }
    );
}

#[tokio::test]
async fn test_repair_trigger_noop_when_remote_is_authoritative() {
    let env = TestEnv::new();
    let metadata = Arc::new(StaticClusterMetadata::new(
        "active",
        10,
        vec![("active".to_string(), 0), ("standby".to_string(), 1)],
    ));
    let trigger = RepairTrigger::new(0, metadata, env.frontend.clone());

    // version 101 -> initial version 1 -> "standby", remote.
    trigger.trigger(&sync_activity_task(37, 101)).await.unwrap();
    assert!(env.frontend.signals().is_empty());
}

#[tokio::test]
async fn test_corrupt_task_lands_in_dlq_and_triggers_repair_end_to_end() {
    let env = TestEnv::new();
    env.engine.push_failure(ReplicationError::Corruption {
        msg: "stale mutable state".to_string(),
    });
    env.admin.push_reply(0, reply(vec![sync_activity_task(40, 100)], 40));
    env.start().await;

    env.wait_until("the task to be consumed", || {
        env.processor.last_processed_message_id() == 40
    })
    .await;
    env.stop().await;

    let rows = env.store.dlq_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_cluster_name, "standby");
    assert_eq!(rows[0].task_info.task_id, 40);
    assert_eq!(env.frontend.signals().len(), 1);
    assert_eq!(env.processor.metrics().snapshot().tasks_dlq, 1);
    assert_eq!(env.processor.metrics().snapshot().repair_triggered, 1);
}

#[tokio::test]
async fn test_missing_entity_triggers_repair_without_dlq() {
    let env = TestEnv::new();
    env.engine.push_failure(ReplicationError::EntityNotExists {
        msg: "workflow not found".to_string(),
    });
    env.admin.push_reply(0, reply(vec![sync_activity_task(41, 100)], 41));
    env.start().await;

    env.wait_until("the task to be consumed", || {
        env.processor.last_processed_message_id() == 41
    })
    .await;
    env.stop().await;

    assert!(env.store.dlq_rows().is_empty());
    assert_eq!(env.frontend.signals().len(), 1);
}
