//! The upsert executor: resolves each request item into an insert or an
//! update, drives the engine on the primary, and replays generated sources
//! on replicas.
//!
//! Version conflicts are handled in one place: the retry loop below. An
//! item that carries insert values is tried as an insert first; on a
//! conflict it falls back to its update assignments, and keeps retrying
//! while neither a sequence number nor a concrete version pins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;

use crate::engine::{
    Doc, IndexResult, SchemaUpdateClient, ShardWriteEngine, TranslogLocation, VersionType,
};
use crate::error::ShardWriteError;
use crate::meta::TableInfo;
use crate::request::{
    DuplicateKeyAction, Item, ShardId, ShardWriteRequest, MATCH_ANY, MATCH_DELETED,
    UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO,
};
use crate::response::{Failure, ShardResponse};
use crate::source_gen::{GeneratedValidation, InsertSourceGen, UpdateSourceGen};

/// Upper bound on conflict retries per item, guarding against livelock on
/// unexpected engine states.
pub const MAX_RETRY_LIMIT: usize = 100_000;

/// Result of executing a request on the primary.
#[derive(Debug)]
pub struct PrimaryResult {
    pub response: ShardResponse,
    /// Highest translog location written, for the caller's durability sync.
    pub last_translog_location: Option<TranslogLocation>,
}

/// Executes shard write requests against an engine, forwarding required
/// mapping updates to the master.
pub struct UpsertExecutor<E, C> {
    engine: Arc<E>,
    schema_updates: Arc<C>,
}

impl<E, C> UpsertExecutor<E, C>
where
    E: ShardWriteEngine,
    C: SchemaUpdateClient,
{
    pub fn new(engine: Arc<E>, schema_updates: Arc<C>) -> Self {
        Self {
            engine,
            schema_updates,
        }
    }

    /// Process all items of a request on the primary, in input order.
    ///
    /// Per-item failures are recorded in the response (and the item's
    /// source nulled so replicas skip it); fatal errors abort the batch
    /// and propagate as `Err`.
    pub async fn execute_on_primary(
        &self,
        table: &TableInfo,
        request: &mut ShardWriteRequest,
        killed: &AtomicBool,
    ) -> Result<PrimaryResult, ShardWriteError> {
        let validation = if request.validate_constraints {
            GeneratedValidation::ValueMatch
        } else {
            GeneratedValidation::None
        };
        let insert_columns = request.insert_columns.clone();
        let update_columns = request.update_columns.clone();
        let insert_gen = insert_columns
            .as_ref()
            .map(|columns| InsertSourceGen::new(table, columns, validation));
        let update_gen = update_columns
            .as_ref()
            .map(|columns| UpdateSourceGen::new(table, columns));

        let shard_id = request.shard_id.clone();
        let duplicate_key_action = request.duplicate_key_action;
        let continue_on_error = request.continue_on_error;

        let mut response = ShardResponse::new();
        let mut last_translog_location = None;

        for item in request.items.iter_mut() {
            if killed.load(Ordering::Relaxed) {
                // Items not yet processed keep a null source, so replicas
                // skip them; items already written are replicated as usual.
                response.set_failure(ShardWriteError::Interrupted);
                break;
            }
            let outcome = self
                .index_item_retrying(
                    &shard_id,
                    item,
                    duplicate_key_action,
                    insert_gen.as_ref(),
                    update_gen.as_ref(),
                )
                .await;
            match outcome {
                Ok(Some(location)) => {
                    last_translog_location = Some(location);
                    response.add_success(item.location);
                }
                // Duplicate-key IGNORE: the collision is a successful no-op.
                Ok(None) => response.add_success(item.location),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::debug!(
                        shard = %shard_id,
                        id = %item.id,
                        error = %error,
                        "failed to execute upsert"
                    );
                    // Mark the item as failed so the replica skips it.
                    item.source = None;
                    if continue_on_error {
                        response.add_failure(
                            item.location,
                            Failure {
                                id: item.id.clone(),
                                version_conflict: error.is_version_conflict(),
                                message: error.to_string(),
                            },
                        );
                    } else {
                        response.set_failure(error);
                        break;
                    }
                }
            }
        }

        Ok(PrimaryResult {
            response,
            last_translog_location,
        })
    }

    /// Replay the sources generated on the primary. Items whose primary
    /// operation failed carry no source and are skipped.
    pub async fn execute_on_replica(
        &self,
        request: &ShardWriteRequest,
    ) -> Result<Option<TranslogLocation>, ShardWriteError> {
        let mut location = None;
        for item in &request.items {
            let Some(source) = item.source.clone() else {
                tracing::trace!(
                    shard = %request.shard_id,
                    id = %item.id,
                    "document has no source, primary operation must have failed"
                );
                continue;
            };
            let result = self
                .engine
                .apply_index_operation_on_replica(item.seq_no, item.version, &item.id, source)
                .await?;
            match result {
                IndexResult::MappingUpdateRequired { update } => {
                    // The primary waited for the master's ack, but nothing
                    // guarantees this replica has applied the mapping yet;
                    // the caller retries once it has propagated.
                    return Err(ShardWriteError::RetryOnReplica { update });
                }
                IndexResult::Success { location: written, .. } => location = Some(written),
                IndexResult::Failure { error, .. } => return Err(error),
            }
        }
        Ok(location)
    }

    /// Retry loop around one item. Returns the translog location on
    /// success, `None` when a duplicate key was ignored.
    async fn index_item_retrying(
        &self,
        shard_id: &ShardId,
        item: &mut Item,
        duplicate_key_action: DuplicateKeyAction,
        insert_gen: Option<&InsertSourceGen<'_>>,
        update_gen: Option<&UpdateSourceGen<'_>>,
    ) -> Result<Option<TranslogLocation>, ShardWriteError> {
        let mut insert_first = item.insert_values.is_some();
        let mut last_conflict = None;
        for attempt in 0..MAX_RETRY_LIMIT {
            let result = self
                .index_item(
                    shard_id,
                    item,
                    insert_first,
                    duplicate_key_action,
                    insert_gen,
                    update_gen,
                    attempt > 0,
                )
                .await;
            match result {
                Ok(location) => return Ok(Some(location)),
                Err(error) if error.is_version_conflict() => {
                    if duplicate_key_action == DuplicateKeyAction::Ignore {
                        // On conflict do nothing.
                        item.source = None;
                        return Ok(None);
                    }
                    let has_assignments = item
                        .update_assignments
                        .as_ref()
                        .is_some_and(|a| !a.is_empty());
                    if has_assignments && insert_first {
                        insert_first = false;
                        last_conflict = Some(error);
                        continue;
                    }
                    if has_assignments && item.retry_on_conflict() {
                        tracing::trace!(
                            shard = %shard_id,
                            id = %item.id,
                            version = item.version,
                            retry_count = attempt,
                            "version conflict, retrying operation"
                        );
                        last_conflict = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(error) => return Err(error),
            }
        }
        tracing::warn!(
            shard = %shard_id,
            id = %item.id,
            version = item.version,
            limit = MAX_RETRY_LIMIT,
            "version conflict exceeded retry limit, will stop retrying"
        );
        Err(last_conflict.expect("retry loop only exhausts after conflicts"))
    }

    /// One attempt at an item: generate the source for the chosen path and
    /// apply it to the engine.
    #[allow(clippy::too_many_arguments)]
    async fn index_item(
        &self,
        shard_id: &ShardId,
        item: &mut Item,
        try_insert_first: bool,
        duplicate_key_action: DuplicateKeyAction,
        insert_gen: Option<&InsertSourceGen<'_>>,
        update_gen: Option<&UpdateSourceGen<'_>>,
        is_retry: bool,
    ) -> Result<TranslogLocation, ShardWriteError> {
        let version;
        let seq_no;
        let primary_term;
        if try_insert_first {
            version = if duplicate_key_action == DuplicateKeyAction::Overwrite {
                MATCH_ANY
            } else {
                MATCH_DELETED
            };
            seq_no = UNASSIGNED_SEQ_NO;
            primary_term = UNASSIGNED_PRIMARY_TERM;
            let generator = insert_gen.ok_or_else(|| {
                ShardWriteError::Engine(anyhow!("item has insert values but the request has no insert columns"))
            })?;
            let values = item.insert_values.as_deref().unwrap_or(&[]);
            generator.check_constraints(values)?;
            item.source = Some(generator.generate_source(values)?);
        } else {
            let current = self
                .get_document(item.id.as_str(), item.version, item.seq_no, item.primary_term)
                .await?;
            let generator = update_gen.ok_or_else(|| {
                ShardWriteError::Engine(anyhow!("item has update assignments but the request has no update columns"))
            })?;
            let assignments = item.update_assignments.as_deref().unwrap_or(&[]);
            let insert_values = item.insert_values.as_deref().unwrap_or(&[]);
            item.source = Some(generator.generate_source(&current, assignments, insert_values)?);
            seq_no = item.seq_no;
            primary_term = item.primary_term;
            version = MATCH_ANY;
        }

        let source = item.source.clone().expect("source generated above");
        let result = self
            .apply_handling_mapping_update(
                shard_id,
                &item.id,
                source,
                version,
                seq_no,
                primary_term,
                is_retry,
            )
            .await?;
        match result {
            IndexResult::Success {
                seq_no,
                version,
                location,
            } => {
                // Record the assigned values so replicas apply the same
                // operation.
                item.seq_no = seq_no;
                item.version = version;
                Ok(location)
            }
            IndexResult::Failure { error, .. } => Err(error),
            IndexResult::MappingUpdateRequired { .. } => Err(ShardWriteError::Engine(anyhow!(
                "required mapping updates must have been handled before the operation completed"
            ))),
        }
    }

    /// Apply an index operation, transparently pushing a required mapping
    /// delta to the master and retrying once it is acknowledged.
    #[allow(clippy::too_many_arguments)]
    async fn apply_handling_mapping_update(
        &self,
        shard_id: &ShardId,
        id: &str,
        source: Bytes,
        version: i64,
        seq_no: i64,
        primary_term: i64,
        is_retry: bool,
    ) -> Result<IndexResult, ShardWriteError> {
        let mut mapping_updated = false;
        loop {
            let result = self
                .engine
                .apply_index_operation_on_primary(
                    version,
                    VersionType::Internal,
                    id,
                    source.clone(),
                    seq_no,
                    primary_term,
                    is_retry,
                )
                .await?;
            let IndexResult::MappingUpdateRequired { update } = result else {
                return Ok(result);
            };
            if mapping_updated {
                // The master acknowledged the delta but the primary still
                // has not seen it; the whole operation is retried there.
                return Ok(self.engine.failed_index_result(
                    ShardWriteError::RetryOnPrimary {
                        message: format!(
                            "dynamic mapping update on shard {shard_id} has not been applied on the primary yet"
                        ),
                    },
                    MATCH_ANY,
                ));
            }
            tracing::debug!(
                shard = %shard_id,
                id,
                "engine requires a mapping update, forwarding to master"
            );
            self.schema_updates
                .update_mapping_on_master(&shard_id.index, &update)
                .await?;
            mapping_updated = true;
        }
    }

    /// Load the current document for the update path.
    async fn get_document(
        &self,
        id: &str,
        version: i64,
        seq_no: i64,
        primary_term: i64,
    ) -> Result<Doc, ShardWriteError> {
        // When sequence versioning is used this lookup surfaces the
        // version conflict itself.
        let doc = self
            .engine
            .lookup_doc(id, VersionType::Internal, seq_no, primary_term)
            .await?
            .ok_or_else(|| ShardWriteError::DocumentMissing { id: id.to_string() })?;
        if doc.source.is_none() {
            return Err(ShardWriteError::DocumentSourceMissing { id: id.to_string() });
        }
        if version != MATCH_ANY && version != doc.version {
            return Err(ShardWriteError::VersionConflict {
                id: id.to_string(),
                message: format!("requested version [{version}] but got version [{}]", doc.version),
            });
        }
        Ok(doc)
    }
}
