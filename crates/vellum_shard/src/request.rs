//! The shard write request and its items.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use crate::expr::Expr;
use crate::meta::{Reference, Scalar, SessionSettings};

/// Version sentinel: accept whatever version the shard currently has.
pub const MATCH_ANY: i64 = -3;
/// Version sentinel: only succeed when no live document exists.
pub const MATCH_DELETED: i64 = -4;
/// Sequence-number sentinel: let the shard choose.
pub const UNASSIGNED_SEQ_NO: i64 = -2;
/// Primary-term value for operations without a concrete term.
pub const UNASSIGNED_PRIMARY_TERM: i64 = 0;

/// Identity of one shard of an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub index: String,
    pub id: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// What to do when an insert hits an existing document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateKeyAction {
    Ignore,
    Overwrite,
    UpdateOrFail,
}

impl DuplicateKeyAction {
    pub fn ordinal(self) -> u32 {
        match self {
            DuplicateKeyAction::Ignore => 0,
            DuplicateKeyAction::Overwrite => 1,
            DuplicateKeyAction::UpdateOrFail => 2,
        }
    }

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(DuplicateKeyAction::Ignore),
            1 => Some(DuplicateKeyAction::Overwrite),
            2 => Some(DuplicateKeyAction::UpdateOrFail),
            _ => None,
        }
    }
}

/// One document of a shard write request.
///
/// `source` starts out empty, is filled by the primary once the document
/// payload has been generated, and is what replicas apply. A failed item
/// has its source nulled again so replicas skip it.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub id: String,
    /// Index of this item in the coordinating node's bulk, used to order
    /// response entries.
    pub location: i32,
    /// Assignments applied when the document already exists.
    pub update_assignments: Option<Vec<Expr>>,
    /// Values inserted when it does not, aligned with the request's insert
    /// columns.
    pub insert_values: Option<Vec<Scalar>>,
    pub version: i64,
    pub seq_no: i64,
    pub primary_term: i64,
    pub source: Option<Bytes>,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        update_assignments: Option<Vec<Expr>>,
        insert_values: Option<Vec<Scalar>>,
        version: Option<i64>,
        seq_no: Option<i64>,
        primary_term: Option<i64>,
    ) -> Self {
        Self {
            id: id.into(),
            location: 0,
            update_assignments,
            insert_values,
            version: version.unwrap_or(MATCH_ANY),
            seq_no: seq_no.unwrap_or(UNASSIGNED_SEQ_NO),
            primary_term: primary_term.unwrap_or(UNASSIGNED_PRIMARY_TERM),
            source: None,
        }
    }

    pub fn insert(id: impl Into<String>, insert_values: Vec<Scalar>) -> Self {
        Self::new(id, None, Some(insert_values), None, None, None)
    }

    pub fn update(id: impl Into<String>, update_assignments: Vec<Expr>) -> Self {
        Self::new(id, Some(update_assignments), None, None, None, None)
    }

    pub fn with_location(mut self, location: i32) -> Self {
        self.location = location;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_seq_no(mut self, seq_no: i64, primary_term: i64) -> Self {
        self.seq_no = seq_no;
        self.primary_term = primary_term;
        self
    }

    /// Whether a version conflict may be retried: the caller pinned neither
    /// a sequence number nor a concrete version.
    pub fn retry_on_conflict(&self) -> bool {
        self.seq_no == UNASSIGNED_SEQ_NO && self.version == MATCH_ANY
    }
}

/// Batch of upsert items addressed to one shard's primary.
#[derive(Clone, Debug, PartialEq)]
pub struct ShardWriteRequest {
    pub shard_id: ShardId,
    pub job_id: Uuid,
    pub continue_on_error: bool,
    pub validate_constraints: bool,
    pub duplicate_key_action: DuplicateKeyAction,
    pub session_settings: SessionSettings,
    /// Column names used on update.
    pub update_columns: Option<Vec<String>>,
    /// Column references used on insert.
    pub insert_columns: Option<Vec<Reference>>,
    /// Expressions computed for RETURNING.
    pub return_values: Option<Vec<Expr>>,
    pub items: Vec<Item>,
}

impl ShardWriteRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard_id: ShardId,
        job_id: Uuid,
        continue_on_error: bool,
        validate_constraints: bool,
        duplicate_key_action: DuplicateKeyAction,
        session_settings: SessionSettings,
        update_columns: Option<Vec<String>>,
        insert_columns: Option<Vec<Reference>>,
        return_values: Option<Vec<Expr>>,
    ) -> Self {
        debug_assert!(
            update_columns.is_some() || insert_columns.is_some(),
            "missing assignments, neither for update nor for insert"
        );
        Self {
            shard_id,
            job_id,
            continue_on_error,
            validate_constraints,
            duplicate_key_action,
            session_settings,
            update_columns,
            insert_columns,
            return_values,
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: Item) {
        let location = self.items.len() as i32;
        self.items.push(item.with_location(location));
    }
}

/// Per-shard request factory used by the coordinating node; one builder
/// covers all shards touched by a statement.
#[derive(Clone, Debug)]
pub struct ShardWriteRequestBuilder {
    session_settings: SessionSettings,
    continue_on_error: bool,
    validate_constraints: bool,
    duplicate_key_action: DuplicateKeyAction,
    update_columns: Option<Vec<String>>,
    insert_columns: Option<Vec<Reference>>,
    return_values: Option<Vec<Expr>>,
    job_id: Uuid,
}

impl ShardWriteRequestBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_settings: SessionSettings,
        continue_on_error: bool,
        validate_constraints: bool,
        duplicate_key_action: DuplicateKeyAction,
        update_columns: Option<Vec<String>>,
        insert_columns: Option<Vec<Reference>>,
        return_values: Option<Vec<Expr>>,
        job_id: Uuid,
    ) -> Self {
        Self {
            session_settings,
            continue_on_error,
            validate_constraints,
            duplicate_key_action,
            update_columns,
            insert_columns,
            return_values,
            job_id,
        }
    }

    pub fn new_request(&self, shard_id: ShardId) -> ShardWriteRequest {
        ShardWriteRequest::new(
            shard_id,
            self.job_id,
            self.continue_on_error,
            self.validate_constraints,
            self.duplicate_key_action,
            self.session_settings.clone(),
            self.update_columns.clone(),
            self.insert_columns.clone(),
            self.return_values.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_on_conflict_requires_both_sentinels() {
        let free = Item::update("1", vec![]);
        assert!(free.retry_on_conflict());
        let pinned_version = Item::update("1", vec![]).with_version(3);
        assert!(!pinned_version.retry_on_conflict());
        let pinned_seq = Item::update("1", vec![]).with_seq_no(10, 1);
        assert!(!pinned_seq.retry_on_conflict());
    }

    #[test]
    fn add_item_assigns_locations_in_order() {
        let builder = ShardWriteRequestBuilder::new(
            SessionSettings::default(),
            true,
            false,
            DuplicateKeyAction::UpdateOrFail,
            Some(vec!["a".to_string()]),
            None,
            None,
            Uuid::new_v4(),
        );
        let mut request = builder.new_request(ShardId::new("orders", 0));
        request.add_item(Item::update("1", vec![]));
        request.add_item(Item::update("2", vec![]));
        assert_eq!(request.items[0].location, 0);
        assert_eq!(request.items[1].location, 1);
    }
}
