//! End-to-end pull/apply scenarios over the wired fetcher + processor.

use crate::harness::*;
use windlass_repl::engine::SyncShardStatusRequest;
use windlass_repl::error::ReplicationError;

#[tokio::test]
async fn test_empty_reply_advances_both_watermarks_and_refetches() {
    let env = TestEnv::new();
    env.admin.push_reply(0, reply(vec![], 100));
    env.start().await;

    env.wait_until("watermarks to reach 100", || {
        env.processor.last_processed_message_id() == 100
            && env.processor.last_retrieved_message_id() == 100
    })
    .await;

    // After NoTaskRetryWait the processor asks again, now from 100.
    env.wait_until("a re-fetch carrying the new watermarks", || {
        env.admin.calls().iter().any(|tokens| {
            tokens.iter().any(|t| {
                t.shard_id == 0
                    && t.last_processed_message_id == 100
                    && t.last_retrieved_message_id == 100
            })
        })
    })
    .await;
    env.stop().await;
}

#[tokio::test]
async fn test_initial_fetch_request_carries_no_message_id() {
    let env = TestEnv::new();
    env.start().await;

    env.wait_until("the first fetch request", || !env.admin.calls().is_empty())
        .await;
    let first = &env.admin.calls()[0];
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].shard_id, 0);
    assert_eq!(first[0].last_processed_message_id, -1);
    assert_eq!(first[0].last_retrieved_message_id, -1);
    env.stop().await;
}

#[tokio::test]
async fn test_sync_shard_status_forwarded_to_engine() {
    let env = TestEnv::new();
    env.admin.push_reply(0, reply_with_status(vec![], 10, 424242));
    env.start().await;

    env.wait_until("the shard status to reach the engine", || {
        env.engine.calls().iter().any(|call| {
            matches!(call, EngineCall::SyncShardStatus(req) if *req == SyncShardStatusRequest {
                source_cluster: "standby".to_string(),
                shard_id: 0,
                timestamp: Some(424242),
            })
        })
    })
    .await;
    env.stop().await;
}

#[tokio::test]
async fn test_tasks_apply_in_source_order() {
    let env = TestEnv::new();
    env.admin.push_reply(
        0,
        reply(
            vec![
                sync_activity_task(11, 0),
                sync_activity_task(13, 0),
                sync_activity_task(17, 0),
            ],
            17,
        ),
    );
    env.start().await;

    env.wait_until("all tasks applied", || {
        env.processor.last_processed_message_id() == 17
    })
    .await;
    env.stop().await;

    // The harness mirrors each task's ID into scheduled_id, so apply order
    // is observable at the engine: strictly increasing source order.
    let scheduled: Vec<i64> = env
        .engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EngineCall::SyncActivity(req) => Some(req.scheduled_id),
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, vec![11, 13, 17]);
    assert_eq!(env.processor.last_retrieved_message_id(), 17);
}

#[tokio::test]
async fn test_same_reply_twice_is_idempotent() {
    let env = TestEnv::new();
    // The task is corrupted on both passes, landing in the DLQ each time.
    env.engine.push_failure(ReplicationError::Corruption {
        msg: "stale mutable state".to_string(),
    });
    env.engine.push_failure(ReplicationError::Corruption {
        msg: "stale mutable state".to_string(),
    });
    let messages = reply(vec![sync_activity_task(21, 0)], 21);

    env.processor.process_response(&messages).await.unwrap();
    let first_processed = env.processor.last_processed_message_id();
    let first_retrieved = env.processor.last_retrieved_message_id();

    env.processor.process_response(&messages).await.unwrap();
    assert_eq!(env.processor.last_processed_message_id(), first_processed);
    assert_eq!(env.processor.last_retrieved_message_id(), first_retrieved);
    // Redelivery rewrites the same record; dedup by key sees one row.
    assert_eq!(env.store.unique_dlq_keys().len(), 1);
    assert!(env
        .store
        .unique_dlq_keys()
        .contains(&("standby".to_string(), 21)));
}

#[tokio::test]
async fn test_policy_errors_consume_without_dlq() {
    let env = TestEnv::new();
    env.engine.push_failure(ReplicationError::DomainNotActive {
        domain_id: "d".to_string(),
    });
    env.processor
        .process_response(&reply(vec![sync_activity_task(22, 0)], 22))
        .await
        .unwrap();
    assert_eq!(env.processor.last_processed_message_id(), 22);
    assert!(env.store.dlq_rows().is_empty());
    assert!(env.frontend.signals().is_empty());
}

#[tokio::test]
async fn test_transient_failure_refetches_same_range() {
    let env = TestEnv::new();
    // Three attempts, all transient: the batch aborts without advancing.
    for _ in 0..3 {
        env.engine.push_failure(ReplicationError::Transient {
            msg: "engine busy".to_string(),
        });
    }
    env.admin.push_reply(0, reply(vec![sync_activity_task(11, 0)], 11));
    env.admin.push_reply(0, reply(vec![sync_activity_task(11, 0)], 11));
    env.start().await;

    env.wait_until("the task to apply on the second pass", || {
        env.processor.last_processed_message_id() == 11
    })
    .await;
    env.stop().await;

    // The re-fetch after the abort still carried the original processed
    // watermark, so the same range was requested again.
    let calls = env.admin.calls();
    assert!(calls.len() >= 2);
    assert_eq!(calls[1][0].last_processed_message_id, -1);
    assert_eq!(calls[1][0].last_retrieved_message_id, 11);
    assert_eq!(env.processor.metrics().snapshot().tasks_failed, 3);
    assert_eq!(env.processor.metrics().snapshot().tasks_applied, 1);
}

#[tokio::test]
async fn test_resumes_from_persisted_ack_level() {
    let env = TestEnv::new();
    env.store.seed_level(0, "standby", 88);
    env.start().await;

    env.wait_until("the first fetch request", || !env.admin.calls().is_empty())
        .await;
    assert_eq!(env.admin.calls()[0][0].last_processed_message_id, 88);
    env.stop().await;
}

#[tokio::test]
async fn test_stop_persists_watermark_for_source_gc() {
    let env = TestEnv::new();
    env.admin.push_reply(0, reply(vec![], 64));
    env.start().await;
    env.wait_until("the empty reply to land", || {
        env.processor.last_processed_message_id() == 64
    })
    .await;
    env.stop().await;
    assert_eq!(env.store.level(0, "standby"), Some(64));
    assert_eq!(env.store.ack_level(0), Some(64));
}
