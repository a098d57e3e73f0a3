//! Error types for the replication subsystem.

use thiserror::Error;

/// Errors that can occur while fetching, applying, or persisting replication tasks.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Transient failure (network, timeout, serialization conflict). Safe to retry.
    #[error("transient error: {msg}")]
    Transient {
        /// Error message describing the failure.
        msg: String,
    },

    /// The remote or local service is overloaded and shed the request.
    #[error("service busy")]
    ServiceBusy,

    /// The shard is no longer owned by this host.
    #[error("shard {shard_id} ownership lost")]
    ShardOwnershipLost {
        /// The shard whose ownership was lost.
        shard_id: i32,
    },

    /// The workflow or activity the task refers to does not exist locally.
    #[error("entity not exists: {msg}")]
    EntityNotExists {
        /// Error message describing the missing entity.
        msg: String,
    },

    /// Replication state is corrupted and the task cannot be applied.
    #[error("corrupted replication task: {msg}")]
    Corruption {
        /// Error message describing the corruption.
        msg: String,
    },

    /// The domain is not active in this cluster; the task does not apply here.
    #[error("domain not active: {domain_id}")]
    DomainNotActive {
        /// The domain the task belongs to.
        domain_id: String,
    },

    /// Event blob encode/decode failure.
    #[error("serialization error")]
    Serialization(#[from] bincode::Error),

    /// Persistence layer failure.
    #[error("store error: {msg}")]
    Store {
        /// Error message from the persistence layer.
        msg: String,
    },

    /// No cluster is registered for the given failover version.
    #[error("unknown failover version: {version}")]
    UnknownFailoverVersion {
        /// The failover version that could not be routed.
        version: i64,
    },

    /// The component was asked to shut down while waiting.
    #[error("replication shut down")]
    Shutdown,

    /// Unrecoverable failure; the processor halts and surfaces to the shard owner.
    #[error("fatal replication error: {msg}")]
    Fatal {
        /// Error message describing the failure.
        msg: String,
    },
}

impl ReplicationError {
    /// Returns true if the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReplicationError::Transient { .. }
                | ReplicationError::ServiceBusy
                | ReplicationError::Store { .. }
        )
    }

    /// Returns true if the task referenced an entity missing from local state.
    pub fn is_entity_not_exists(&self) -> bool {
        matches!(self, ReplicationError::EntityNotExists { .. })
    }

    /// Returns true if the task payload could not be decoded or is inconsistent.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ReplicationError::Corruption { .. } | ReplicationError::Serialization(_)
        )
    }

    /// Returns true for policy outcomes that consume the task as a no-op:
    /// the domain is not replicated here, or the version is disallowed.
    pub fn is_terminal_policy(&self) -> bool {
        matches!(
            self,
            ReplicationError::DomainNotActive { .. }
                | ReplicationError::UnknownFailoverVersion { .. }
        )
    }

    /// Returns true if the processor must halt rather than continue applying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplicationError::Fatal { .. } | ReplicationError::ShardOwnershipLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ReplicationError::Transient { msg: "timeout".into() }.is_transient());
        assert!(ReplicationError::ServiceBusy.is_transient());
        assert!(!ReplicationError::ServiceBusy.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ReplicationError::ShardOwnershipLost { shard_id: 7 }.is_fatal());
        assert!(ReplicationError::Fatal { msg: "store down".into() }.is_fatal());
        assert!(!ReplicationError::Fatal { msg: "store down".into() }.is_transient());
    }

    #[test]
    fn test_corruption_covers_serialization() {
        let err = bincode::serialize(&u64::MAX).and_then(|b| {
            bincode::deserialize::<String>(&b).map(|_| ())
        });
        let err = ReplicationError::from(err.unwrap_err());
        assert!(err.is_corruption());
    }

    #[test]
    fn test_terminal_policy_classification() {
        assert!(ReplicationError::DomainNotActive { domain_id: "d".into() }.is_terminal_policy());
        assert!(ReplicationError::UnknownFailoverVersion { version: 5 }.is_terminal_policy());
        assert!(!ReplicationError::EntityNotExists { msg: "gone".into() }.is_terminal_policy());
        assert!(!ReplicationError::Corruption { msg: "bad".into() }.is_terminal_policy());
    }

    #[test]
    fn test_display_messages() {
        let err = ReplicationError::ShardOwnershipLost { shard_id: 3 };
        assert_eq!(err.to_string(), "shard 3 ownership lost");
        let err = ReplicationError::UnknownFailoverVersion { version: 42 };
        assert_eq!(err.to_string(), "unknown failover version: 42");
    }
}
