pub mod balances;
pub mod config;
pub mod error;
pub mod indexer;
pub mod output;
pub mod participants;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineFailure, SnapshotError};
