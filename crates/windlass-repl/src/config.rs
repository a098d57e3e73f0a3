//! Replication configuration knobs.

use crate::backoff::RetryPolicy;
use std::time::Duration;

/// Tunables for the fetcher and per-shard processors.
///
/// Defaults match production settings; tests override individual fields.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Sleep after a reply with no tasks before fetching again.
    pub no_task_retry_wait: Duration,
    /// Fetch RPC rate toward one source cluster (requests/sec).
    pub fetch_qps: f64,
    /// Server-side long-poll timeout of the fetch RPC.
    pub long_poll_timeout: Duration,
    /// Extra slack on top of the long-poll timeout before a processor gives
    /// up waiting for its reply and re-requests.
    pub reply_timeout_slack: Duration,
    /// Depth of the fetcher's request channel; sized to the shard count.
    pub fetch_request_channel_depth: usize,
    /// Upper bound on requests coalesced into one fetch RPC.
    pub max_coalesced_requests: usize,
    /// Sleep after a failed fetch RPC before the next iteration.
    pub fetch_error_retry_wait: Duration,
    /// Backoff policy for applying one replication task.
    pub task_retry_policy: RetryPolicy,
    /// Backoff policy for DLQ writes.
    pub dlq_retry_policy: RetryPolicy,
    /// Probability in `[0, 1]` of injecting a synthetic transient error per
    /// task attempt. Zero disables injection.
    pub error_injection_rate: f64,
    /// Interval between watermark flushes to the shard store.
    pub ack_flush_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            no_task_retry_wait: Duration::from_millis(250),
            fetch_qps: 100.0,
            long_poll_timeout: Duration::from_secs(30),
            reply_timeout_slack: Duration::from_secs(5),
            fetch_request_channel_depth: 1024,
            max_coalesced_requests: 1024,
            fetch_error_retry_wait: Duration::from_secs(1),
            task_retry_policy: RetryPolicy::task_apply(),
            dlq_retry_policy: RetryPolicy::dlq_write(),
            error_injection_rate: 0.0,
            ack_flush_interval: Duration::from_secs(5),
        }
    }
}

impl ReplicationConfig {
    /// Total time a processor waits for a fetch reply before re-requesting.
    pub fn reply_timeout(&self) -> Duration {
        self.long_poll_timeout + self.reply_timeout_slack
    }
}
