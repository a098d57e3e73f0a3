//! Property-based tests for watermark and DLQ-projection invariants.

use crate::harness::*;
use proptest::prelude::*;
use windlass_repl::dlq::generate_dlq_request;
use windlass_repl::task::{
    HistoryEvent, ReplicationTask, ReplicationTaskAttributes, SyncActivityTaskAttributes,
};

/// Build a sequence of well-formed replies with globally increasing task IDs.
/// Each element of `shape` is (gaps-between-task-ids, extra-retrieved-slack).
fn build_replies(shape: Vec<(Vec<u8>, u8)>) -> Vec<windlass_repl::task::ReplicationMessages> {
    let mut next_id: i64 = 0;
    let mut replies = Vec::with_capacity(shape.len());
    for (gaps, slack) in shape {
        let mut tasks = Vec::with_capacity(gaps.len());
        for gap in gaps {
            next_id += 1 + gap as i64;
            tasks.push(sync_activity_task(next_id, 0));
        }
        let last_retrieved = next_id + slack as i64;
        next_id = last_retrieved;
        replies.push(reply(tasks, last_retrieved));
    }
    replies
}

proptest! {
    #[test]
    fn prop_watermarks_are_monotone_and_ordered(
        shape in proptest::collection::vec(
            (proptest::collection::vec(0u8..5, 0..4), 0u8..3),
            0..8,
        ),
        replay_each in proptest::bool::ANY,
    ) {
        let replies = build_replies(shape);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let env = TestEnv::new();
            let mut prev_processed = env.processor.last_processed_message_id();
            let mut prev_retrieved = env.processor.last_retrieved_message_id();
            for messages in &replies {
                let passes = if replay_each { 2 } else { 1 };
                for _ in 0..passes {
                    env.processor.process_response(messages).await.unwrap();

                    let processed = env.processor.last_processed_message_id();
                    let retrieved = env.processor.last_retrieved_message_id();
                    prop_assert!(processed >= prev_processed, "processed watermark regressed");
                    prop_assert!(retrieved >= prev_retrieved, "retrieved watermark regressed");
                    prop_assert!(processed <= retrieved, "processed overtook retrieved");
                    prop_assert_eq!(retrieved, messages.last_retrieved_message_id.max(prev_retrieved));
                    prev_processed = processed;
                    prev_retrieved = retrieved;
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_sync_activity_projection_preserves_identifiers(
        domain_id in "[a-z0-9-]{1,24}",
        workflow_id in "[a-zA-Z0-9_-]{1,24}",
        run_id in "[a-z0-9-]{1,24}",
        scheduled_id in 0i64..1_000_000,
        version in 0i64..1_000_000,
        task_id in 0i64..1_000_000,
    ) {
        let task = ReplicationTask {
            source_task_id: task_id,
            creation_time: None,
            attributes: ReplicationTaskAttributes::SyncActivity(SyncActivityTaskAttributes {
                domain_id: domain_id.clone(),
                workflow_id: workflow_id.clone(),
                run_id: run_id.clone(),
                version,
                scheduled_id,
                scheduled_time: None,
                started_id: 0,
                started_time: None,
                last_heartbeat_time: None,
                attempt: 0,
                details: vec![],
            }),
        };
        let request = generate_dlq_request("standby", &task).unwrap();
        prop_assert_eq!(request.task_info.domain_id, domain_id);
        prop_assert_eq!(request.task_info.workflow_id, workflow_id);
        prop_assert_eq!(request.task_info.run_id, run_id);
        prop_assert_eq!(request.task_info.scheduled_id, scheduled_id);
        prop_assert_eq!(request.task_info.version, version);
        prop_assert_eq!(request.task_info.task_id, task_id);
    }

    #[test]
    fn prop_history_projection_spans_the_event_batch(
        first_event_id in 1i64..1_000_000,
        version in 1i64..1_000_000,
        event_count in 1usize..32,
    ) {
        let events: Vec<HistoryEvent> = (0..event_count as i64)
            .map(|offset| HistoryEvent {
                event_id: first_event_id + offset,
                version,
                timestamp: 0,
                event_type: "generic".to_string(),
            })
            .collect();
        let request = generate_dlq_request("standby", &history_task(1, &events)).unwrap();
        prop_assert_eq!(request.task_info.first_event_id, first_event_id);
        prop_assert_eq!(
            request.task_info.next_event_id,
            first_event_id + event_count as i64
        );
        prop_assert_eq!(request.task_info.version, version);
    }
}
