//! Task fetcher: one long-poll channel per source cluster, shared by all
//! shard processors.
//!
//! Processors enqueue fetch requests carrying their watermarks; the fetcher
//! coalesces them, keeps the latest request per shard, spends one rate-limit
//! token, and issues a single `get_replication_messages` RPC for the whole
//! batch. Replies are routed back per shard with `try_send`: a slow processor
//! loses the reply and simply re-requests with the same watermarks.

use crate::admin::AdminClient;
use crate::config::ReplicationConfig;
use crate::metrics::ReplicationMetrics;
use crate::task::{ReplicationMessages, ReplicationToken};
use crate::throttle::DynamicRateLimiter;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One shard's fetch request: its read position and where to send the reply.
#[derive(Debug)]
pub struct FetchRequest {
    /// The shard's current watermarks.
    pub token: ReplicationToken,
    /// Reply channel owned by the requesting processor (depth 1).
    pub reply: mpsc::Sender<ReplicationMessages>,
}

/// Cheap handle processors hold onto their fetcher.
#[derive(Clone)]
pub struct FetcherHandle {
    source_cluster: String,
    request_tx: mpsc::Sender<FetchRequest>,
    rate_limiter: Arc<DynamicRateLimiter>,
}

impl FetcherHandle {
    /// Build a handle from raw parts; used by tests to stand in for a fetcher.
    pub fn from_parts(
        source_cluster: impl Into<String>,
        request_tx: mpsc::Sender<FetchRequest>,
        rate_limiter: Arc<DynamicRateLimiter>,
    ) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            request_tx,
            rate_limiter,
        }
    }

    /// The source cluster this fetcher polls.
    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    /// Sender half of the fetcher's request channel.
    pub fn request_chan(&self) -> &mpsc::Sender<FetchRequest> {
        &self.request_tx
    }

    /// The rate limiter shared by all consumers of this source cluster.
    pub fn rate_limiter(&self) -> &Arc<DynamicRateLimiter> {
        &self.rate_limiter
    }
}

/// Long-poll fetch multiplexer for one `(local cluster, source cluster)` pair.
pub struct TaskFetcher {
    source_cluster: String,
    local_cluster: String,
    admin: Arc<dyn AdminClient>,
    config: Arc<ReplicationConfig>,
    metrics: Arc<ReplicationMetrics>,
    rate_limiter: Arc<DynamicRateLimiter>,
    request_tx: mpsc::Sender<FetchRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<FetchRequest>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskFetcher {
    /// Create a fetcher. Call [`TaskFetcher::start`] to launch its worker.
    pub fn new(
        source_cluster: impl Into<String>,
        local_cluster: impl Into<String>,
        admin: Arc<dyn AdminClient>,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.fetch_request_channel_depth);
        let (shutdown_tx, _) = watch::channel(false);
        let qps = config.fetch_qps;
        Self {
            source_cluster: source_cluster.into(),
            local_cluster: local_cluster.into(),
            admin,
            config,
            metrics: Arc::new(ReplicationMetrics::new()),
            rate_limiter: Arc::new(DynamicRateLimiter::fixed(qps)),
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// The source cluster this fetcher polls.
    pub fn source_cluster(&self) -> &str {
        &self.source_cluster
    }

    /// Handle for processors: source name, request channel, rate limiter.
    pub fn handle(&self) -> FetcherHandle {
        FetcherHandle {
            source_cluster: self.source_cluster.clone(),
            request_tx: self.request_tx.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }

    /// Fetcher-side metrics (batch size, errors, dropped replies).
    pub fn metrics(&self) -> &Arc<ReplicationMetrics> {
        &self.metrics
    }

    /// Launch the background worker. Subsequent calls are no-ops.
    pub fn start(&self) {
        let Some(request_rx) = self.request_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
        else {
            return;
        };
        let worker = FetchWorker {
            source_cluster: self.source_cluster.clone(),
            local_cluster: self.local_cluster.clone(),
            admin: self.admin.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            rate_limiter: self.rate_limiter.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(worker.run(request_rx, shutdown_rx));
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(source_cluster = %self.source_cluster, "replication task fetcher started");
    }

    /// Stop the worker and wait for it to exit. Subsequent calls are no-ops.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!(source_cluster = %self.source_cluster, "replication task fetcher stopped");
        }
    }
}

struct FetchWorker {
    source_cluster: String,
    local_cluster: String,
    admin: Arc<dyn AdminClient>,
    config: Arc<ReplicationConfig>,
    metrics: Arc<ReplicationMetrics>,
    rate_limiter: Arc<DynamicRateLimiter>,
}

impl FetchWorker {
    async fn run(
        self,
        mut request_rx: mpsc::Receiver<FetchRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let first = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                request = request_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            // Coalesce everything already queued, keeping the latest request
            // per shard: a later request carries newer watermarks.
            let mut pending: HashMap<i32, FetchRequest> = HashMap::new();
            pending.insert(first.token.shard_id, first);
            while pending.len() < self.config.max_coalesced_requests {
                match request_rx.try_recv() {
                    Ok(request) => {
                        pending.insert(request.token.shard_id, request);
                    }
                    Err(_) => break,
                }
            }

            if self.rate_limiter.acquire(&mut shutdown).await.is_err() {
                break;
            }

            let tokens: Vec<ReplicationToken> =
                pending.values().map(|request| request.token).collect();
            self.metrics
                .fetch_batch_size
                .store(tokens.len() as u64, Ordering::Relaxed);
            debug!(
                source_cluster = %self.source_cluster,
                shards = tokens.len(),
                "issuing replication fetch"
            );

            match self
                .admin
                .get_replication_messages(tokens, &self.local_cluster)
                .await
            {
                Ok(response) => {
                    for (shard_id, request) in pending {
                        let Some(messages) = response.shard_messages.get(&shard_id) else {
                            continue;
                        };
                        if request.reply.try_send(messages.clone()).is_err() {
                            self.metrics.replies_dropped.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                source_cluster = %self.source_cluster,
                                shard_id,
                                "reply channel full, dropping; processor will re-request"
                            );
                        }
                    }
                }
                Err(err) => {
                    self.metrics.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        source_cluster = %self.source_cluster,
                        error = %err,
                        "replication fetch failed; processors will re-request"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.config.fetch_error_retry_wait) => {}
                    }
                }
            }
        }
        debug!(source_cluster = %self.source_cluster, "fetch worker exiting");
    }
}

/// The set of fetchers for every remote cluster this host replicates from.
pub struct TaskFetchers {
    fetchers: HashMap<String, Arc<TaskFetcher>>,
}

impl TaskFetchers {
    /// Build one fetcher per remote cluster.
    pub fn new(
        local_cluster: &str,
        remotes: impl IntoIterator<Item = (String, Arc<dyn AdminClient>)>,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        let fetchers = remotes
            .into_iter()
            .map(|(source, admin)| {
                let fetcher = Arc::new(TaskFetcher::new(
                    source.clone(),
                    local_cluster,
                    admin,
                    config.clone(),
                ));
                (source, fetcher)
            })
            .collect();
        Self { fetchers }
    }

    /// The fetcher polling `source_cluster`, when one exists.
    pub fn get(&self, source_cluster: &str) -> Option<&Arc<TaskFetcher>> {
        self.fetchers.get(source_cluster)
    }

    /// Start every fetcher.
    pub fn start_all(&self) {
        for fetcher in self.fetchers.values() {
            fetcher.start();
        }
    }

    /// Stop every fetcher.
    pub async fn stop_all(&self) {
        for fetcher in self.fetchers.values() {
            fetcher.stop().await;
        }
    }
}
