//! Replication metrics with Prometheus text exposition.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lock-free counters and gauges for one `(shard, source cluster)` processor
/// and its fetcher. Cloned snapshots are exported in Prometheus text format.
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    /// Tasks applied through the history engine.
    pub tasks_applied: AtomicU64,
    /// Task attempts that returned an error (any class).
    pub tasks_failed: AtomicU64,
    /// Tasks routed to the DLQ.
    pub tasks_dlq: AtomicU64,
    /// Data-inconsistency repair workflows signalled.
    pub repair_triggered: AtomicU64,
    /// Non-empty fetch replies processed.
    pub batches_fetched: AtomicU64,
    /// Fetch replies with no tasks.
    pub empty_batches: AtomicU64,
    /// Failed fetch RPCs.
    pub fetch_errors: AtomicU64,
    /// Replies dropped because a processor's reply channel was full.
    pub replies_dropped: AtomicU64,
    /// Shard tokens carried by the most recent fetch RPC.
    pub fetch_batch_size: AtomicU64,
    /// `last_retrieved - last_processed` for this shard.
    pub watermark_lag: AtomicI64,
    /// Sum of apply latencies in microseconds.
    pub task_latency_total_us: AtomicU64,
    /// Number of latency samples in `task_latency_total_us`.
    pub task_latency_samples: AtomicU64,
    /// Sum of source-to-apply replication delays in microseconds.
    pub replication_lag_total_us: AtomicU64,
    /// Number of samples in `replication_lag_total_us`.
    pub replication_lag_samples: AtomicU64,
}

impl ReplicationMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one apply latency sample.
    pub fn record_task_latency_us(&self, latency_us: u64) {
        self.task_latency_total_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.task_latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one source-to-apply replication delay sample.
    pub fn record_replication_lag_us(&self, lag_us: u64) {
        self.replication_lag_total_us
            .fetch_add(lag_us, Ordering::Relaxed);
        self.replication_lag_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_applied: self.tasks_applied.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_dlq: self.tasks_dlq.load(Ordering::Relaxed),
            repair_triggered: self.repair_triggered.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            empty_batches: self.empty_batches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            fetch_batch_size: self.fetch_batch_size.load(Ordering::Relaxed),
            watermark_lag: self.watermark_lag.load(Ordering::Relaxed),
            task_latency_total_us: self.task_latency_total_us.load(Ordering::Relaxed),
            task_latency_samples: self.task_latency_samples.load(Ordering::Relaxed),
            replication_lag_total_us: self.replication_lag_total_us.load(Ordering::Relaxed),
            replication_lag_samples: self.replication_lag_samples.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReplicationMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Tasks applied through the history engine.
    pub tasks_applied: u64,
    /// Task attempts that returned an error.
    pub tasks_failed: u64,
    /// Tasks routed to the DLQ.
    pub tasks_dlq: u64,
    /// Repair workflows signalled.
    pub repair_triggered: u64,
    /// Non-empty fetch replies processed.
    pub batches_fetched: u64,
    /// Fetch replies with no tasks.
    pub empty_batches: u64,
    /// Failed fetch RPCs.
    pub fetch_errors: u64,
    /// Replies dropped on a full reply channel.
    pub replies_dropped: u64,
    /// Shard tokens in the most recent fetch RPC.
    pub fetch_batch_size: u64,
    /// `last_retrieved - last_processed`.
    pub watermark_lag: i64,
    /// Sum of apply latencies (microseconds).
    pub task_latency_total_us: u64,
    /// Latency sample count.
    pub task_latency_samples: u64,
    /// Sum of replication delays (microseconds).
    pub replication_lag_total_us: u64,
    /// Replication delay sample count.
    pub replication_lag_samples: u64,
}

impl MetricsSnapshot {
    /// Mean apply latency in microseconds, zero with no samples.
    pub fn avg_task_latency_us(&self) -> u64 {
        if self.task_latency_samples == 0 {
            0
        } else {
            self.task_latency_total_us / self.task_latency_samples
        }
    }

    /// Render in Prometheus text exposition format, labelled by source
    /// cluster and shard.
    pub fn to_prometheus(&self, source_cluster: &str, shard_id: i32) -> String {
        let labels = format!("source_cluster=\"{}\",shard_id=\"{}\"", source_cluster, shard_id);
        let mut out = String::new();
        let counters: [(&str, &str, u64); 8] = [
            ("windlass_repl_tasks_applied_total", "Replication tasks applied", self.tasks_applied),
            ("windlass_repl_tasks_failed_total", "Replication task attempts that failed", self.tasks_failed),
            ("windlass_repl_tasks_dlq_total", "Replication tasks routed to the DLQ", self.tasks_dlq),
            ("windlass_repl_repair_triggered_total", "Data-inconsistency repair workflows signalled", self.repair_triggered),
            ("windlass_repl_batches_fetched_total", "Non-empty fetch replies processed", self.batches_fetched),
            ("windlass_repl_empty_batches_total", "Fetch replies with no tasks", self.empty_batches),
            ("windlass_repl_fetch_errors_total", "Failed fetch RPCs", self.fetch_errors),
            ("windlass_repl_replies_dropped_total", "Replies dropped on a full reply channel", self.replies_dropped),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
        let gauges: [(&str, &str, i64); 2] = [
            ("windlass_repl_watermark_lag", "last_retrieved minus last_processed", self.watermark_lag),
            ("windlass_repl_fetch_batch_size", "Shard tokens in the most recent fetch RPC", self.fetch_batch_size as i64),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} gauge\n", name));
            out.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
        out
    }
}
