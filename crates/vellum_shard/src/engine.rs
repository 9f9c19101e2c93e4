//! Contracts consumed from the shard's storage engine and the master's
//! schema-update path.
//!
//! The executor never talks to the indexing engine or the translog
//! directly; everything goes through `ShardWriteEngine`, and mapping
//! deltas discovered during indexing go to the master through
//! `SchemaUpdateClient`.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::ShardWriteError;

/// How a supplied version is interpreted by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionType {
    /// Versions are managed by the shard itself.
    Internal,
    /// Versions are supplied by the caller.
    External,
}

/// Durable position in the shard's write-ahead log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TranslogLocation {
    pub generation: u64,
    pub offset: u64,
}

impl TranslogLocation {
    pub fn new(generation: u64, offset: u64) -> Self {
        Self { generation, offset }
    }
}

/// Document loaded from the shard for the update path.
#[derive(Clone, Debug, PartialEq)]
pub struct Doc {
    pub id: String,
    pub source: Option<Bytes>,
    pub version: i64,
    pub seq_no: i64,
    pub primary_term: i64,
}

/// Mapping delta the engine needs before it can index a document.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingUpdate(pub Value);

impl fmt::Display for MappingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one engine index operation.
#[derive(Debug)]
pub enum IndexResult {
    Success {
        seq_no: i64,
        version: i64,
        location: TranslogLocation,
    },
    Failure {
        error: ShardWriteError,
        version: i64,
    },
    /// The document carries fields the active mapping does not know yet;
    /// the caller must get the delta accepted before retrying.
    MappingUpdateRequired { update: MappingUpdate },
}

/// Write surface of the shard's indexing engine and translog.
#[async_trait]
pub trait ShardWriteEngine: Send + Sync {
    async fn apply_index_operation_on_primary(
        &self,
        version: i64,
        version_type: VersionType,
        id: &str,
        source: Bytes,
        seq_no: i64,
        primary_term: i64,
        is_retry: bool,
    ) -> Result<IndexResult, ShardWriteError>;

    async fn apply_index_operation_on_replica(
        &self,
        seq_no: i64,
        version: i64,
        id: &str,
        source: Bytes,
    ) -> Result<IndexResult, ShardWriteError>;

    /// Wrap an error into a failed index result.
    fn failed_index_result(&self, error: ShardWriteError, version: i64) -> IndexResult {
        IndexResult::Failure { error, version }
    }

    /// Load a document by id. A sequence-number mismatch surfaces as a
    /// version-conflict error from the engine.
    async fn lookup_doc(
        &self,
        id: &str,
        version_type: VersionType,
        seq_no: i64,
        primary_term: i64,
    ) -> Result<Option<Doc>, ShardWriteError>;
}

/// Client submitting mapping deltas to the master node.
#[async_trait]
pub trait SchemaUpdateClient: Send + Sync {
    /// Submit a mapping delta and wait until the master acknowledged it.
    async fn update_mapping_on_master(
        &self,
        index: &str,
        update: &MappingUpdate,
    ) -> Result<(), ShardWriteError>;
}
