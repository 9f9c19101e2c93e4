//! Per-shard upsert write path: the wire-level shard write request, the
//! source generators producing document payloads, and the executor that
//! drives the primary and replica paths against the storage engine.
//!
//! The engine, translog, and master schema updates are consumed through
//! the traits in [`engine`]; nothing here touches storage directly.

pub mod engine;
pub mod error;
pub mod executor;
pub mod expr;
pub mod meta;
pub mod request;
pub mod response;
pub mod source_gen;
pub mod wire;

pub use engine::{
    Doc, IndexResult, MappingUpdate, SchemaUpdateClient, ShardWriteEngine, TranslogLocation,
    VersionType,
};
pub use error::ShardWriteError;
pub use executor::{PrimaryResult, UpsertExecutor, MAX_RETRY_LIMIT};
pub use expr::{BinaryOp, EvalInput, Expr, ExprError};
pub use meta::{CheckConstraint, DataType, Reference, Scalar, SessionSettings, TableInfo};
pub use request::{
    DuplicateKeyAction, Item, ShardId, ShardWriteRequest, ShardWriteRequestBuilder, MATCH_ANY,
    MATCH_DELETED, UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO,
};
pub use response::{Failure, ShardResponse};
pub use source_gen::{GeneratedValidation, InsertSourceGen, SourceGenError, UpdateSourceGen};
pub use wire::{decode_request, encode_request, ProtocolVersion, WireError};
