//! Per-shard replication task processor.
//!
//! One processor exists per `(shard, source cluster)` pair. It owns the
//! shard's two watermarks, drives the pull/apply loop against the shared
//! fetcher, applies tasks through the executor in strictly increasing
//! `source_task_id` order, and escalates poisoned tasks to the DLQ and the
//! repair bridge. A flush loop persists the processed watermark so the
//! source cluster can garbage-collect its queue.

use crate::config::ReplicationConfig;
use crate::dlq::DlqWriter;
use crate::error::ReplicationError;
use crate::executor::TaskExecutor;
use crate::fetcher::{FetchRequest, FetcherHandle};
use crate::metrics::ReplicationMetrics;
use crate::repair::RepairTrigger;
use crate::shard::ShardContext;
use crate::task::{ReplicationMessages, ReplicationTask, ReplicationToken, SyncShardStatus};
use crate::throttle::current_time_us;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle state of one processor. Transitions are driven only by
/// [`TaskProcessor::start`] and [`TaskProcessor::stop`]; there is no
/// auto-restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Created, not yet started.
    Initialised,
    /// Pull and flush loops are running.
    Running,
    /// Stop requested; loops are draining.
    Stopping,
    /// Fully stopped; watermarks persisted.
    Stopped,
}

/// Per-shard replication task processor.
pub struct TaskProcessor {
    core: Arc<ProcessorCore>,
    state: Mutex<ProcessorState>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct ProcessorCore {
    shard: ShardContext,
    source_cluster: String,
    request_tx: mpsc::Sender<FetchRequest>,
    executor: Arc<dyn TaskExecutor>,
    dlq: DlqWriter,
    repair: RepairTrigger,
    metrics: Arc<ReplicationMetrics>,
    config: Arc<ReplicationConfig>,
    shutdown_rx: watch::Receiver<bool>,
    last_processed: AtomicI64,
    last_retrieved: AtomicI64,
    reply_tx: mpsc::Sender<ReplicationMessages>,
    reply_rx: tokio::sync::Mutex<mpsc::Receiver<ReplicationMessages>>,
}

impl TaskProcessor {
    /// Create a processor for one shard consuming from `fetcher`'s source
    /// cluster. Watermarks start at the shard's persisted level when
    /// [`TaskProcessor::start`] runs; until then they are `-1`.
    pub fn new(
        shard: ShardContext,
        fetcher: FetcherHandle,
        executor: Arc<dyn TaskExecutor>,
        dlq: DlqWriter,
        repair: RepairTrigger,
    ) -> Self {
        let config = shard.config().clone();
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = ProcessorCore {
            shard,
            source_cluster: fetcher.source_cluster().to_string(),
            request_tx: fetcher.request_chan().clone(),
            executor,
            dlq,
            repair,
            metrics: Arc::new(ReplicationMetrics::new()),
            config,
            shutdown_rx,
            last_processed: AtomicI64::new(crate::shard::NO_MESSAGE_ID),
            last_retrieved: AtomicI64::new(crate::shard::NO_MESSAGE_ID),
            reply_tx,
            reply_rx: tokio::sync::Mutex::new(reply_rx),
        };
        Self {
            core: Arc::new(core),
            state: Mutex::new(ProcessorState::Initialised),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Highest task ID fully handled (applied, DLQ-ed, or discarded).
    pub fn last_processed_message_id(&self) -> i64 {
        self.core.last_processed.load(Ordering::SeqCst)
    }

    /// Highest task ID seen in any reply.
    pub fn last_retrieved_message_id(&self) -> i64 {
        self.core.last_retrieved.load(Ordering::SeqCst)
    }

    /// Processor-side metrics.
    pub fn metrics(&self) -> &Arc<ReplicationMetrics> {
        &self.core.metrics
    }

    /// Load persisted watermarks and launch the pull and flush loops.
    /// Only the `Initialised -> Running` transition starts anything.
    pub async fn start(&self) -> Result<(), ReplicationError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ProcessorState::Initialised {
                return Ok(());
            }
            *state = ProcessorState::Running;
        }
        let level = self
            .core
            .shard
            .replication_level(&self.core.source_cluster)
            .await?;
        self.core.last_processed.fetch_max(level, Ordering::SeqCst);
        self.core.last_retrieved.fetch_max(level, Ordering::SeqCst);

        let pull = {
            let core = self.core.clone();
            let shutdown = self.core.shutdown_rx.clone();
            tokio::spawn(async move { core.pull_loop(shutdown).await })
        };
        let flush = {
            let core = self.core.clone();
            let shutdown = self.core.shutdown_rx.clone();
            tokio::spawn(async move { core.ack_flush_loop(shutdown).await })
        };
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([pull, flush]);
        info!(
            shard_id = self.core.shard.shard_id(),
            source_cluster = %self.core.source_cluster,
            start_level = level,
            "replication task processor started"
        );
        Ok(())
    }

    /// Request cancellation, wait for both loops, persist final watermarks.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ProcessorState::Running => *state = ProcessorState::Stopping,
                ProcessorState::Stopped => return,
                _ => {}
            }
        }
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for worker in workers {
            let _ = worker.await;
        }
        let last_processed = self.core.last_processed.load(Ordering::SeqCst);
        if let Err(err) = self
            .core
            .shard
            .flush_replication_level(&self.core.source_cluster, last_processed)
            .await
        {
            warn!(
                shard_id = self.core.shard.shard_id(),
                error = %err,
                "failed to persist final replication level"
            );
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ProcessorState::Stopped;
        info!(
            shard_id = self.core.shard.shard_id(),
            source_cluster = %self.core.source_cluster,
            last_processed,
            "replication task processor stopped"
        );
    }

    /// Enqueue a fetch request carrying the current watermarks. A full
    /// request channel is not an error; the next loop turn asks again.
    pub fn send_fetch_request(&self) {
        self.core.send_fetch_request();
    }

    /// Apply one fetch reply: advance the retrieved watermark, apply tasks in
    /// order, and advance the processed watermark per task outcome.
    pub async fn process_response(
        &self,
        response: &ReplicationMessages,
    ) -> Result<(), ReplicationError> {
        self.core.process_response(response).await
    }

    /// Forward a source shard health signal to the engine via the executor.
    pub async fn handle_sync_shard_status(
        &self,
        status: &SyncShardStatus,
    ) -> Result<(), ReplicationError> {
        self.core.executor.handle_sync_shard_status(status).await
    }
}

impl ProcessorCore {
    fn token(&self) -> ReplicationToken {
        ReplicationToken {
            shard_id: self.shard.shard_id(),
            last_processed_message_id: self.last_processed.load(Ordering::SeqCst),
            last_retrieved_message_id: self.last_retrieved.load(Ordering::SeqCst),
        }
    }

    fn send_fetch_request(&self) {
        let request = FetchRequest {
            token: self.token(),
            reply: self.reply_tx.clone(),
        };
        if self.request_tx.try_send(request).is_err() {
            debug!(
                shard_id = self.shard.shard_id(),
                "fetch request channel full, will retry after reply timeout"
            );
        }
    }

    async fn pull_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.send_fetch_request();

            let reply = {
                let mut reply_rx = self.reply_rx.lock().await;
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    reply = reply_rx.recv() => match reply {
                        Some(reply) => reply,
                        None => break,
                    },
                    // Liveness: a stuck fetcher must not block the shard.
                    _ = tokio::time::sleep(self.config.reply_timeout()) => {
                        debug!(
                            shard_id = self.shard.shard_id(),
                            "no fetch reply within timeout, re-requesting"
                        );
                        continue;
                    }
                }
            };

            if let Some(status) = &reply.sync_shard_status {
                if let Err(err) = self.executor.handle_sync_shard_status(status).await {
                    warn!(
                        shard_id = self.shard.shard_id(),
                        error = %err,
                        "failed to forward sync shard status"
                    );
                }
            }

            match self.process_response(&reply).await {
                Ok(()) => {
                    if reply.tasks.is_empty()
                        && !reply.has_more
                        && !self
                            .sleep_cancellable(self.config.no_task_retry_wait, &mut shutdown)
                            .await
                    {
                        break;
                    }
                }
                Err(err) if err.is_fatal() => {
                    error!(
                        shard_id = self.shard.shard_id(),
                        source_cluster = %self.source_cluster,
                        error = %err,
                        "fatal replication error, processor halting"
                    );
                    break;
                }
                Err(err) => {
                    warn!(
                        shard_id = self.shard.shard_id(),
                        error = %err,
                        "batch aborted, same range will be re-fetched"
                    );
                }
            }
        }
        debug!(shard_id = self.shard.shard_id(), "pull loop exiting");
    }

    /// Sleep unless shutdown fires first. Returns false on shutdown.
    async fn sleep_cancellable(
        &self,
        duration: std::time::Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn ack_flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.ack_flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let last_processed = self.last_processed.load(Ordering::SeqCst);
                    if let Err(err) = self
                        .shard
                        .flush_replication_level(&self.source_cluster, last_processed)
                        .await
                    {
                        warn!(
                            shard_id = self.shard.shard_id(),
                            error = %err,
                            "failed to flush replication ack level"
                        );
                    }
                }
            }
        }
        debug!(shard_id = self.shard.shard_id(), "ack flush loop exiting");
    }

    async fn process_response(
        &self,
        response: &ReplicationMessages,
    ) -> Result<(), ReplicationError> {
        self.last_retrieved
            .fetch_max(response.last_retrieved_message_id, Ordering::SeqCst);

        if response.tasks.is_empty() {
            // Nothing between the watermarks: the source confirmed the range
            // is empty, so the processed watermark catches up in one step.
            self.last_processed
                .fetch_max(response.last_retrieved_message_id, Ordering::SeqCst);
            self.metrics.empty_batches.fetch_add(1, Ordering::Relaxed);
            self.update_lag_gauge();
            return Ok(());
        }

        self.metrics.batches_fetched.fetch_add(1, Ordering::Relaxed);
        for task in &response.tasks {
            self.process_single_task(task).await?;
            self.last_processed
                .fetch_max(task.source_task_id, Ordering::SeqCst);
        }
        self.update_lag_gauge();
        Ok(())
    }

    async fn process_single_task(&self, task: &ReplicationTask) -> Result<(), ReplicationError> {
        let started = Instant::now();
        let result = self.apply_with_retry(task).await;
        self.metrics
            .record_task_latency_us(started.elapsed().as_micros() as u64);

        match result {
            Ok(()) => {
                self.metrics.tasks_applied.fetch_add(1, Ordering::Relaxed);
                if let Some(creation_time) = task.creation_time {
                    let now_us = current_time_us() as i64;
                    let lag_us = now_us.saturating_sub(creation_time / 1_000);
                    if lag_us >= 0 {
                        self.metrics.record_replication_lag_us(lag_us as u64);
                    }
                }
                Ok(())
            }
            Err(err @ ReplicationError::Shutdown) => Err(err),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) if err.is_transient() => {
                // Retries exhausted; abort the batch without advancing so the
                // same range is fetched again.
                Err(err)
            }
            Err(err) if err.is_entity_not_exists() => {
                debug!(
                    task_id = task.source_task_id,
                    error = %err,
                    "entity missing locally, escalating to repair"
                );
                self.escalate_repair(task).await;
                Ok(())
            }
            Err(err) if err.is_corruption() => {
                warn!(
                    task_id = task.source_task_id,
                    task_type = task.task_type().as_str(),
                    error = %err,
                    "corrupted task, routing to DLQ"
                );
                self.put_to_dlq(task).await?;
                self.escalate_repair(task).await;
                Ok(())
            }
            Err(err) if err.is_terminal_policy() => {
                // Policy outcome, not a failure: the task does not apply in
                // this cluster and is consumed without a DLQ record.
                debug!(
                    task_id = task.source_task_id,
                    task_type = task.task_type().as_str(),
                    error = %err,
                    "task not applicable here, swallowing"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    task_id = task.source_task_id,
                    task_type = task.task_type().as_str(),
                    error = %err,
                    "task not applicable, routing to DLQ"
                );
                self.put_to_dlq(task).await?;
                Ok(())
            }
        }
    }

    async fn apply_with_retry(&self, task: &ReplicationTask) -> Result<(), ReplicationError> {
        let policy = &self.config.task_retry_policy;
        let mut shutdown = self.shutdown_rx.clone();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = if self.inject_error() {
                Err(ReplicationError::Transient {
                    msg: "injected replication error".to_string(),
                })
            } else {
                self.executor.execute(task, false).await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => {
                    self.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    match policy.delay_for(attempt) {
                        Some(delay) => {
                            debug!(
                                task_id = task.source_task_id,
                                attempt,
                                error = %err,
                                "transient apply failure, backing off"
                            );
                            if !self.sleep_cancellable(delay, &mut shutdown).await {
                                return Err(ReplicationError::Shutdown);
                            }
                        }
                        None => return Err(err),
                    }
                }
                Err(err) => {
                    self.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    /// DLQ write failures are fatal: losing the durable record would break
    /// the guarantee that every observed task ID is accounted for. The one
    /// exception is a task that cannot even be projected (undecodable blob);
    /// retrying it can never succeed, so it is dropped with an error log and
    /// left to the repair scan.
    async fn put_to_dlq(&self, task: &ReplicationTask) -> Result<(), ReplicationError> {
        match self.dlq.put(task).await {
            Ok(()) => {
                self.metrics.tasks_dlq.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) if err.is_corruption() => {
                error!(
                    task_id = task.source_task_id,
                    error = %err,
                    "cannot project task for DLQ, dropping"
                );
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => Err(ReplicationError::Fatal {
                msg: format!("DLQ write failed: {}", err),
            }),
        }
    }

    async fn escalate_repair(&self, task: &ReplicationTask) {
        match self.repair.trigger(task).await {
            Ok(()) => {
                self.metrics.repair_triggered.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // The checker dedups by execution; a lost trigger only delays
                // detection, it never loses the DLQ record.
                warn!(
                    task_id = task.source_task_id,
                    error = %err,
                    "failed to trigger data-inconsistency scan"
                );
            }
        }
    }

    fn inject_error(&self) -> bool {
        let rate = self.config.error_injection_rate;
        rate > 0.0 && rand::random::<f64>() < rate
    }

    fn update_lag_gauge(&self) {
        let lag = self.last_retrieved.load(Ordering::SeqCst)
            - self.last_processed.load(Ordering::SeqCst);
        self.metrics.watermark_lag.store(lag, Ordering::Relaxed);
    }
}
