//! Error taxonomy
//!
//! Per §7 of the spec, errors fall into five kinds. `Conflict` and
//! `Timeout` are recovered or surfaced by the commit orchestrator itself;
//! `SectorFailure` carries enough `UserData` for
//! `handle_registry_sector_lock_timeout` to attempt a takeover; `Resource`
//! and `Usage` are opaque wrappers around collaborator failures and
//! caller misuse respectively.

use crate::types::TransactionId;
use thiserror::Error;

/// Result type alias for vtree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminates the flavor of a [`Error::SectorFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A registry sector may be corrupt; a failover-capable recovery path
    /// (priority rollback or peer takeover) must be attempted.
    RestoreRegistryFileSectorFailure,
}

/// Payload attached to a [`Error::SectorFailure`], used by the orchestrator
/// to decide whether it can take over the failure.
#[derive(Debug, Clone)]
pub enum UserData {
    /// A distributed lock key another worker may already hold.
    LockKey(String),
    /// The transaction ID whose state should be restored.
    TransactionId(TransactionId),
}

/// Unified error type for all vtree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Version mismatch, duplicate key on a unique tree, or a lock owned by
    /// another transaction. Recovered locally by refetch-and-merge + retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cancellation or `maxTime` breach. Surfaced to the caller; the
    /// transaction rolls back.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A registry integrity event. Drives
    /// `handle_registry_sector_lock_timeout` -> `priority_rollback`; if that
    /// fails too, surfaced to the operator.
    #[error("sector failure ({code:?}): {message}")]
    SectorFailure {
        /// The specific failure code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
        /// Context the recovery path can act on.
        user_data: Option<UserData>,
    },

    /// Blob store, cache, or log I/O failure. Collected as `last_err`
    /// during rollback (best-effort), or propagated immediately during
    /// commit.
    #[error("resource error: {0}")]
    Resource(String),

    /// Empty store name, incompatible existing store configuration, or an
    /// attempt to roll back an already-committed transaction. Surfaced
    /// immediately; never retried.
    #[error("usage error: {0}")]
    Usage(String),
}

impl Error {
    /// Construct a sector failure carrying a lock key a takeover can use.
    pub fn sector_failure_with_lock_key(message: impl Into<String>, lock_key: impl Into<String>) -> Self {
        Error::SectorFailure {
            code: ErrorCode::RestoreRegistryFileSectorFailure,
            message: message.into(),
            user_data: Some(UserData::LockKey(lock_key.into())),
        }
    }

    /// Construct a sector failure carrying the owning transaction ID.
    pub fn sector_failure_with_tid(message: impl Into<String>, tid: TransactionId) -> Self {
        Error::SectorFailure {
            code: ErrorCode::RestoreRegistryFileSectorFailure,
            message: message.into(),
            user_data: Some(UserData::TransactionId(tid)),
        }
    }

    /// True if this is a conflict error (eligible for refetch-and-merge retry).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// True if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True if this is a sector failure requiring the takeover path.
    pub fn is_sector_failure(&self) -> bool {
        matches!(self, Error::SectorFailure { .. })
    }

    /// Extract the `UserData` from a sector failure, if any.
    pub fn sector_user_data(&self) -> Option<&UserData> {
        match self {
            Error::SectorFailure { user_data, .. } => user_data.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let e = Error::Conflict("version mismatch".into());
        assert!(e.is_conflict());
        assert!(e.to_string().contains("version mismatch"));
    }

    #[test]
    fn sector_failure_carries_lock_key() {
        let e = Error::sector_failure_with_lock_key("sector corrupt", "lk:abc");
        assert!(e.is_sector_failure());
        match e.sector_user_data() {
            Some(UserData::LockKey(k)) => assert_eq!(k, "lk:abc"),
            _ => panic!("expected lock key"),
        }
    }

    #[test]
    fn timeout_is_not_conflict() {
        let e = Error::Timeout("maxTime exceeded".into());
        assert!(e.is_timeout());
        assert!(!e.is_conflict());
    }
}
