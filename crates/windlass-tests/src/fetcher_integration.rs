//! Fetcher behaviour across multiple shards sharing one long-poll channel.

use crate::harness::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use windlass_repl::admin::{AdminClient, GetReplicationMessagesResponse};
use windlass_repl::config::ReplicationConfig;
use windlass_repl::error::ReplicationError;
use windlass_repl::fetcher::{FetchRequest, TaskFetcher, TaskFetchers};
use windlass_repl::task::ReplicationToken;

fn token(shard_id: i32, processed: i64, retrieved: i64) -> ReplicationToken {
    ReplicationToken {
        shard_id,
        last_processed_message_id: processed,
        last_retrieved_message_id: retrieved,
    }
}

fn fetcher_over(admin: Arc<ScriptedAdminClient>) -> TaskFetcher {
    TaskFetcher::new("standby", "active", admin, Arc::new(fast_config()))
}

#[tokio::test]
async fn test_two_shards_share_one_rpc() {
    let admin = Arc::new(ScriptedAdminClient::default());
    admin.push_response(GetReplicationMessagesResponse {
        shard_messages: HashMap::from([(0, reply(vec![], 5)), (1, reply(vec![], 9))]),
    });
    let fetcher = fetcher_over(admin.clone());
    let (reply0_tx, mut reply0_rx) = mpsc::channel(1);
    let (reply1_tx, mut reply1_rx) = mpsc::channel(1);
    let chan = fetcher.handle().request_chan().clone();
    chan.send(FetchRequest { token: token(0, -1, -1), reply: reply0_tx })
        .await
        .unwrap();
    chan.send(FetchRequest { token: token(1, 4, 4), reply: reply1_tx })
        .await
        .unwrap();
    fetcher.start();

    let first = tokio::time::timeout(Duration::from_secs(5), reply0_rx.recv())
        .await
        .expect("shard 0 reply timed out")
        .unwrap();
    assert_eq!(first.last_retrieved_message_id, 5);
    let second = tokio::time::timeout(Duration::from_secs(5), reply1_rx.recv())
        .await
        .expect("shard 1 reply timed out")
        .unwrap();
    assert_eq!(second.last_retrieved_message_id, 9);

    // Both requests were queued before the worker started, so one RPC
    // carried both shard tokens.
    let calls = admin.calls();
    let mut first_call = calls[0].clone();
    first_call.sort_by_key(|t| t.shard_id);
    assert_eq!(first_call.len(), 2);
    assert_eq!(first_call[0].shard_id, 0);
    assert_eq!(first_call[1].shard_id, 1);
    fetcher.stop().await;
}

#[tokio::test]
async fn test_latest_request_per_shard_wins() {
    let admin = Arc::new(ScriptedAdminClient::default());
    admin.push_reply(0, reply(vec![], 30));
    let fetcher = fetcher_over(admin.clone());

    let (stale_tx, mut stale_rx) = mpsc::channel(1);
    let (fresh_tx, mut fresh_rx) = mpsc::channel(1);
    let chan = fetcher.handle().request_chan().clone();
    chan.send(FetchRequest { token: token(0, 10, 10), reply: stale_tx })
        .await
        .unwrap();
    chan.send(FetchRequest { token: token(0, 20, 20), reply: fresh_tx })
        .await
        .unwrap();
    fetcher.start();

    let reply = tokio::time::timeout(Duration::from_secs(5), fresh_rx.recv())
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(reply.last_retrieved_message_id, 30);
    assert!(stale_rx.try_recv().is_err());
    // The RPC carried only the fresher watermark.
    assert_eq!(admin.calls()[0], vec![token(0, 20, 20)]);
    fetcher.stop().await;
}

#[tokio::test]
async fn test_rpc_failure_sends_no_reply() {
    let admin = Arc::new(ScriptedAdminClient::default());
    admin.push_error(ReplicationError::Transient { msg: "unreachable".to_string() });
    let fetcher = fetcher_over(admin.clone());
    fetcher.start();

    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    fetcher
        .handle()
        .request_chan()
        .send(FetchRequest { token: token(0, -1, -1), reply: reply_tx })
        .await
        .unwrap();

    // The failed RPC yields silence, not an error reply.
    let waited =
        tokio::time::timeout(Duration::from_millis(100), reply_rx.recv()).await;
    assert!(waited.is_err(), "expected no reply after RPC failure");
    fetcher.stop().await;
}

#[tokio::test]
async fn test_fetchers_builds_one_per_remote() {
    let standby: Arc<dyn AdminClient> = Arc::new(ScriptedAdminClient::default());
    let dr: Arc<dyn AdminClient> = Arc::new(ScriptedAdminClient::default());
    let fetchers = TaskFetchers::new(
        "active",
        vec![("standby".to_string(), standby), ("dr".to_string(), dr)],
        Arc::new(ReplicationConfig::default()),
    );
    assert!(fetchers.get("standby").is_some());
    assert!(fetchers.get("dr").is_some());
    assert!(fetchers.get("active").is_none());
    assert_eq!(fetchers.get("standby").unwrap().source_cluster(), "standby");
    fetchers.start_all();
    fetchers.stop_all().await;
}
