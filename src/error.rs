use alloy::primitives::Address;

use crate::pipeline::PipelinePhase;

/// Errors raised by the snapshot components.
///
/// `RemoteUnavailable` is the only transient kind. Reverts and missing blocks are logical
/// answers from the node and are never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("remote node unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("execution reverted: {0}")]
    ExecutionReverted(String),

    #[error("block {0} not found")]
    NotFound(u64),

    #[error("balance of {address} unavailable at block {block}: {reason}")]
    BalanceUnavailable {
        address: Address,
        block: u64,
        reason: String,
    },

    #[error("participant list error: {0}")]
    Participants(String),

    #[error("sink write failed: {0}")]
    Sink(String),

    #[error("run cancelled")]
    Cancelled,
}

impl SnapshotError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

impl From<csv::Error> for SnapshotError {
    fn from(e: csv::Error) -> Self {
        SnapshotError::Sink(e.to_string())
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::Sink(e.to_string())
    }
}

/// A fatal pipeline error, tagged with the phase it happened in.
#[derive(Debug, thiserror::Error)]
#[error("snapshot run failed during {phase}: {source}")]
pub struct PipelineFailure {
    pub phase: PipelinePhase,
    #[source]
    pub source: SnapshotError,
}
