//! Remote admin RPC contract used by the task fetcher.

use crate::error::ReplicationError;
use crate::task::{ReplicationMessages, ReplicationToken};
use async_trait::async_trait;
use std::collections::HashMap;

/// Reply of one long-poll fetch: per-shard message batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetReplicationMessagesResponse {
    /// Message batch per requested shard. Shards with no data may be absent.
    pub shard_messages: HashMap<i32, ReplicationMessages>,
}

/// Admin API of a remote cluster.
///
/// One long-poll call carries the read positions of every shard this host
/// consumes from that cluster; the server blocks up to its long-poll timeout
/// awaiting new tasks.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Fetch replication messages for the given shard tokens.
    /// `cluster_name` identifies the polling (local) cluster to the source.
    async fn get_replication_messages(
        &self,
        tokens: Vec<ReplicationToken>,
        cluster_name: &str,
    ) -> Result<GetReplicationMessagesResponse, ReplicationError>;
}
