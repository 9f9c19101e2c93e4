//! Wire-surfaced error taxonomy of the shard write path.
//!
//! Version conflicts are data here, not control flow: the executor matches
//! on the variant and decides retries in one place.

use crate::engine::MappingUpdate;
use crate::source_gen::SourceGenError;

/// Errors produced while executing a shard write request.
#[derive(Debug, thiserror::Error)]
pub enum ShardWriteError {
    /// Optimistic concurrency check failed.
    #[error("version conflict for document [{id}]: {message}")]
    VersionConflict { id: String, message: String },

    /// An update could not find its target document.
    #[error("document with id [{id}] is missing")]
    DocumentMissing { id: String },

    /// The target document exists but has no stored source.
    #[error("source of document with id [{id}] is missing")]
    DocumentSourceMissing { id: String },

    /// The replica has not seen a required mapping yet; the caller retries
    /// once the mapping has propagated.
    #[error("mappings are not available on the replica yet, triggered update: {update}")]
    RetryOnReplica { update: MappingUpdate },

    /// The primary itself is still waiting for a mapping it triggered; the
    /// whole operation must be retried on the primary.
    #[error("{message}")]
    RetryOnPrimary { message: String },

    /// The batch was killed before this item ran.
    #[error("upsert was interrupted")]
    Interrupted,

    /// Generating the document payload failed.
    #[error(transparent)]
    SourceGen(#[from] SourceGenError),

    /// Infrastructure failure inside the engine or translog.
    #[error("engine failure: {0}")]
    Engine(anyhow::Error),
}

impl ShardWriteError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, ShardWriteError::VersionConflict { .. })
    }

    /// Whether the error aborts the whole batch and propagates to the
    /// caller instead of being recorded per item. Engine failures are
    /// per-item and obey continue-on-error; only the retry-on-primary
    /// case short-circuits.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShardWriteError::RetryOnPrimary { .. })
    }
}

impl From<anyhow::Error> for ShardWriteError {
    fn from(error: anyhow::Error) -> Self {
        ShardWriteError::Engine(error)
    }
}
