//! In-memory fakes and wiring for replication integration tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use windlass_repl::admin::{AdminClient, GetReplicationMessagesResponse};
use windlass_repl::backoff::RetryPolicy;
use windlass_repl::cluster::StaticClusterMetadata;
use windlass_repl::config::ReplicationConfig;
use windlass_repl::dlq::DlqWriter;
use windlass_repl::domain::{DomainCache, DomainEntry};
use windlass_repl::engine::{
    HistoryEngine, ReplicateEventsRequest, SyncActivityRequest, SyncShardStatusRequest,
    SyncWorkflowStateRequest,
};
use windlass_repl::error::ReplicationError;
use windlass_repl::executor::ReplicationTaskExecutor;
use windlass_repl::fetcher::TaskFetcher;
use windlass_repl::frontend::{FrontendClient, SignalWithStartWorkflowExecutionRequest};
use windlass_repl::processor::TaskProcessor;
use windlass_repl::repair::RepairTrigger;
use windlass_repl::shard::ShardContext;
use windlass_repl::store::{ExecutionStore, PutReplicationTaskToDlqRequest, ShardStateStore};
use windlass_repl::task::{
    DataBlob, FailoverMarkerAttributes, HistoryEvent, HistoryTaskV2Attributes,
    ReplicationMessages, ReplicationTask, ReplicationTaskAttributes, ReplicationToken,
    SyncActivityTaskAttributes, SyncShardStatus,
};

/// Every call the fake history engine has received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `sync_activity` was invoked.
    SyncActivity(SyncActivityRequest),
    /// `replicate_events` was invoked.
    ReplicateEvents(ReplicateEventsRequest),
    /// `sync_workflow_state` was invoked.
    SyncWorkflowState(SyncWorkflowStateRequest),
    /// `notify_new_failover_markers` was invoked.
    FailoverMarkers(Vec<FailoverMarkerAttributes>),
    /// `sync_shard_status` was invoked.
    SyncShardStatus(SyncShardStatusRequest),
}

/// Recording fake of the history engine with an optional failure script.
#[derive(Default)]
pub struct FakeHistoryEngine {
    calls: Mutex<Vec<EngineCall>>,
    failures: Mutex<VecDeque<ReplicationError>>,
}

impl FakeHistoryEngine {
    /// Queue an error for the next apply-path call.
    pub fn push_failure(&self, err: ReplicationError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Snapshot of all calls received so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_failure(&self) -> Option<ReplicationError> {
        self.failures.lock().unwrap().pop_front()
    }

    fn record(&self, call: EngineCall) -> Result<(), ReplicationError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl HistoryEngine for FakeHistoryEngine {
    async fn sync_activity(&self, request: SyncActivityRequest) -> Result<(), ReplicationError> {
        self.record(EngineCall::SyncActivity(request))
    }

    async fn replicate_events(
        &self,
        request: ReplicateEventsRequest,
    ) -> Result<(), ReplicationError> {
        self.record(EngineCall::ReplicateEvents(request))
    }

    async fn sync_workflow_state(
        &self,
        request: SyncWorkflowStateRequest,
    ) -> Result<(), ReplicationError> {
        self.record(EngineCall::SyncWorkflowState(request))
    }

    async fn notify_new_failover_markers(
        &self,
        markers: Vec<FailoverMarkerAttributes>,
    ) -> Result<(), ReplicationError> {
        self.record(EngineCall::FailoverMarkers(markers))
    }

    async fn sync_shard_status(
        &self,
        request: SyncShardStatusRequest,
    ) -> Result<(), ReplicationError> {
        // Status forwarding bypasses the failure script; it is advisory.
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::SyncShardStatus(request));
        Ok(())
    }
}

/// Scripted fake of the remote admin API. Replies are popped per call; an
/// exhausted script returns empty responses.
#[derive(Default)]
pub struct ScriptedAdminClient {
    calls: Mutex<Vec<Vec<ReplicationToken>>>,
    replies: Mutex<VecDeque<Result<GetReplicationMessagesResponse, ReplicationError>>>,
}

impl ScriptedAdminClient {
    /// Queue a reply for shard 0.
    pub fn push_reply(&self, shard_id: i32, messages: ReplicationMessages) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(GetReplicationMessagesResponse {
                shard_messages: HashMap::from([(shard_id, messages)]),
            }));
    }

    /// Queue a reply covering several shards at once.
    pub fn push_response(&self, response: GetReplicationMessagesResponse) {
        self.replies.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an RPC failure.
    pub fn push_error(&self, err: ReplicationError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    /// All token batches received so far.
    pub fn calls(&self) -> Vec<Vec<ReplicationToken>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdminClient for ScriptedAdminClient {
    async fn get_replication_messages(
        &self,
        tokens: Vec<ReplicationToken>,
        _cluster_name: &str,
    ) -> Result<GetReplicationMessagesResponse, ReplicationError> {
        self.calls.lock().unwrap().push(tokens);
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(GetReplicationMessagesResponse::default()),
        }
    }
}

/// In-memory execution and shard-state store.
#[derive(Default)]
pub struct MemoryStore {
    dlq: Mutex<Vec<PutReplicationTaskToDlqRequest>>,
    levels: Mutex<HashMap<(i32, String), i64>>,
    ack_levels: Mutex<HashMap<i32, i64>>,
}

impl MemoryStore {
    /// All DLQ rows written so far.
    pub fn dlq_rows(&self) -> Vec<PutReplicationTaskToDlqRequest> {
        self.dlq.lock().unwrap().clone()
    }

    /// Distinct `(source cluster, source task ID)` keys among DLQ rows.
    pub fn unique_dlq_keys(&self) -> std::collections::HashSet<(String, i64)> {
        self.dlq
            .lock()
            .unwrap()
            .iter()
            .map(|row| (row.source_cluster_name.clone(), row.task_info.task_id))
            .collect()
    }

    /// Seed the persisted replication level for `(shard, source cluster)`.
    pub fn seed_level(&self, shard_id: i32, cluster: &str, level: i64) {
        self.levels
            .lock()
            .unwrap()
            .insert((shard_id, cluster.to_string()), level);
    }

    /// The persisted replication level, if any.
    pub fn level(&self, shard_id: i32, cluster: &str) -> Option<i64> {
        self.levels
            .lock()
            .unwrap()
            .get(&(shard_id, cluster.to_string()))
            .copied()
    }

    /// The shard-wide ack level, if the shard has ever flushed.
    pub fn ack_level(&self, shard_id: i32) -> Option<i64> {
        self.ack_levels.lock().unwrap().get(&shard_id).copied()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn put_replication_task_to_dlq(
        &self,
        request: PutReplicationTaskToDlqRequest,
    ) -> Result<(), ReplicationError> {
        self.dlq.lock().unwrap().push(request);
        Ok(())
    }
}

#[async_trait]
impl ShardStateStore for MemoryStore {
    async fn get_cluster_replication_level(
        &self,
        shard_id: i32,
        cluster: &str,
    ) -> Result<Option<i64>, ReplicationError> {
        Ok(self.level(shard_id, cluster))
    }

    async fn update_cluster_replication_level(
        &self,
        shard_id: i32,
        cluster: &str,
        level: i64,
    ) -> Result<(), ReplicationError> {
        self.seed_level(shard_id, cluster, level);
        Ok(())
    }

    async fn get_replication_ack_level(
        &self,
        shard_id: i32,
    ) -> Result<Option<i64>, ReplicationError> {
        Ok(self.ack_level(shard_id))
    }

    async fn update_replication_ack_level(
        &self,
        shard_id: i32,
        level: i64,
    ) -> Result<(), ReplicationError> {
        self.ack_levels.lock().unwrap().insert(shard_id, level);
        Ok(())
    }

    async fn purge_acked_replication_tasks(
        &self,
        _shard_id: i32,
        _below: i64,
    ) -> Result<(), ReplicationError> {
        Ok(())
    }
}

/// Recording fake of the system frontend.
#[derive(Default)]
pub struct FakeFrontendClient {
    signals: Mutex<Vec<SignalWithStartWorkflowExecutionRequest>>,
}

impl FakeFrontendClient {
    /// All signal-with-start requests received so far.
    pub fn signals(&self) -> Vec<SignalWithStartWorkflowExecutionRequest> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrontendClient for FakeFrontendClient {
    async fn signal_with_start_workflow_execution(
        &self,
        request: SignalWithStartWorkflowExecutionRequest,
    ) -> Result<(), ReplicationError> {
        self.signals.lock().unwrap().push(request);
        Ok(())
    }
}

/// Domain cache backed by a fixed map.
#[derive(Default)]
pub struct FakeDomainCache {
    entries: Mutex<HashMap<String, DomainEntry>>,
}

impl FakeDomainCache {
    /// Register a global domain replicated to the given clusters.
    pub fn register(&self, domain_id: &str, clusters: &[&str]) {
        self.entries.lock().unwrap().insert(
            domain_id.to_string(),
            DomainEntry {
                id: domain_id.to_string(),
                name: domain_id.to_string(),
                is_global: true,
                replication_clusters: clusters.iter().map(|c| c.to_string()).collect(),
                failover_version: 0,
            },
        );
    }
}

#[async_trait]
impl DomainCache for FakeDomainCache {
    async fn get_domain_by_id(
        &self,
        domain_id: &str,
    ) -> Result<Option<DomainEntry>, ReplicationError> {
        Ok(self.entries.lock().unwrap().get(domain_id).cloned())
    }
}

/// A fully wired `(shard, source cluster)` replication stack over fakes.
///
/// Local cluster is `"active"` (initial failover version 0), source cluster
/// is `"standby"` (initial failover version 1), failover version increment
/// 10, shard 0. Domain `"d"` replicates to both clusters.
pub struct TestEnv {
    /// The fake history engine.
    pub engine: Arc<FakeHistoryEngine>,
    /// The scripted remote admin client.
    pub admin: Arc<ScriptedAdminClient>,
    /// The in-memory persistence store.
    pub store: Arc<MemoryStore>,
    /// The fake frontend.
    pub frontend: Arc<FakeFrontendClient>,
    /// The fake domain cache.
    pub domains: Arc<FakeDomainCache>,
    /// The fetcher under test.
    pub fetcher: Arc<TaskFetcher>,
    /// The processor under test.
    pub processor: TaskProcessor,
}

impl TestEnv {
    /// Build the default environment with a test-speed config.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Build the environment with a custom config.
    pub fn with_config(config: ReplicationConfig) -> Self {
        let config = Arc::new(config);
        let engine = Arc::new(FakeHistoryEngine::default());
        let admin = Arc::new(ScriptedAdminClient::default());
        let store = Arc::new(MemoryStore::default());
        let frontend = Arc::new(FakeFrontendClient::default());
        let domains = Arc::new(FakeDomainCache::default());
        domains.register("d", &["active", "standby"]);

        let metadata = Arc::new(StaticClusterMetadata::new(
            "active",
            10,
            vec![("active".to_string(), 0), ("standby".to_string(), 1)],
        ));
        let fetcher = Arc::new(TaskFetcher::new(
            "standby",
            "active",
            admin.clone(),
            config.clone(),
        ));
        let shard = ShardContext::new(0, "active", store.clone(), config.clone());
        let executor = Arc::new(ReplicationTaskExecutor::new(
            0,
            "standby",
            "active",
            domains.clone(),
            engine.clone(),
        ));
        let dlq = DlqWriter::new("standby", store.clone(), config.dlq_retry_policy.clone());
        let repair = RepairTrigger::new(0, metadata, frontend.clone());
        let processor = TaskProcessor::new(shard, fetcher.handle(), executor, dlq, repair);

        Self {
            engine,
            admin,
            store,
            frontend,
            domains,
            fetcher,
            processor,
        }
    }

    /// Start both components.
    pub async fn start(&self) {
        self.fetcher.start();
        self.processor.start().await.expect("processor start");
    }

    /// Stop both components.
    pub async fn stop(&self) {
        self.processor.stop().await;
        self.fetcher.stop().await;
    }

    /// Wait until `condition` holds or panic after five seconds.
    pub async fn wait_until(&self, what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Replication config tightened for test speed.
pub fn fast_config() -> ReplicationConfig {
    ReplicationConfig {
        no_task_retry_wait: Duration::from_millis(5),
        fetch_qps: 10_000.0,
        long_poll_timeout: Duration::from_millis(200),
        reply_timeout_slack: Duration::from_millis(100),
        fetch_error_retry_wait: Duration::from_millis(5),
        task_retry_policy: RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 1.0,
            max_interval: Duration::from_millis(1),
            max_attempts: 3,
        },
        ack_flush_interval: Duration::from_millis(20),
        ..ReplicationConfig::default()
    }
}

/// A `SyncActivity` task for domain `"d"`, workflow `"w"`, run `"r"`.
pub fn sync_activity_task(task_id: i64, version: i64) -> ReplicationTask {
    sync_activity_task_for(task_id, version, "d", "w", "r")
}

/// A `SyncActivity` task with explicit identifiers.
pub fn sync_activity_task_for(
    task_id: i64,
    version: i64,
    domain_id: &str,
    workflow_id: &str,
    run_id: &str,
) -> ReplicationTask {
    ReplicationTask {
        source_task_id: task_id,
        creation_time: None,
        attributes: ReplicationTaskAttributes::SyncActivity(SyncActivityTaskAttributes {
            domain_id: domain_id.to_string(),
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            version,
            scheduled_id: task_id,
            scheduled_time: None,
            started_id: 0,
            started_time: None,
            last_heartbeat_time: None,
            attempt: 0,
            details: vec![],
        }),
    }
}

/// A `HistoryV2` task carrying the given events for domain `"d"`.
pub fn history_task(task_id: i64, events: &[HistoryEvent]) -> ReplicationTask {
    ReplicationTask {
        source_task_id: task_id,
        creation_time: None,
        attributes: ReplicationTaskAttributes::HistoryV2(HistoryTaskV2Attributes {
            domain_id: "d".to_string(),
            workflow_id: "w".to_string(),
            run_id: "r".to_string(),
            version_histories: vec![],
            events: DataBlob::encode_events(events).expect("encode events"),
            new_run_events: None,
        }),
    }
}

/// A reply carrying `tasks` up to `last_retrieved`.
pub fn reply(tasks: Vec<ReplicationTask>, last_retrieved: i64) -> ReplicationMessages {
    ReplicationMessages {
        tasks,
        last_retrieved_message_id: last_retrieved,
        has_more: false,
        sync_shard_status: None,
    }
}

/// A reply with a shard health signal attached.
pub fn reply_with_status(
    tasks: Vec<ReplicationTask>,
    last_retrieved: i64,
    timestamp: i64,
) -> ReplicationMessages {
    ReplicationMessages {
        sync_shard_status: Some(SyncShardStatus {
            timestamp: Some(timestamp),
        }),
        ..reply(tasks, last_retrieved)
    }
}
