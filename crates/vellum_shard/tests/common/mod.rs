//! In-memory engine and schema-client doubles used by the executor tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use vellum_shard::{
    Doc, IndexResult, MappingUpdate, SchemaUpdateClient, ShardWriteEngine, ShardWriteError,
    TranslogLocation, VersionType, MATCH_ANY, MATCH_DELETED, UNASSIGNED_SEQ_NO,
};

#[derive(Clone, Debug)]
pub struct StoredDoc {
    pub source: Bytes,
    pub version: i64,
    pub seq_no: i64,
    pub primary_term: i64,
}

/// In-memory stand-in for the shard's indexing engine with the same
/// version/sequence-number semantics the executor relies on.
#[derive(Default)]
pub struct TestEngine {
    docs: Mutex<HashMap<String, StoredDoc>>,
    next_seq_no: AtomicI64,
    next_offset: AtomicU64,
    /// Every version passed to a primary apply, in call order.
    pub primary_versions: Mutex<Vec<i64>>,
    /// Every translog location handed out, in call order.
    pub locations: Mutex<Vec<TranslogLocation>>,
    pub primary_applies: AtomicUsize,
    conflict_always: AtomicBool,
    engine_failure_always: AtomicBool,
    pending_mapping_update: Mutex<Option<MappingUpdate>>,
    replica_mapping_update: Mutex<Option<MappingUpdate>>,
}

impl TestEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: &str, body: Value) {
        let seq_no = self.next_seq_no.fetch_add(1, Ordering::Relaxed);
        self.docs.lock().unwrap().insert(
            id.to_string(),
            StoredDoc {
                source: Bytes::from(serde_json::to_vec(&body).unwrap()),
                version: 1,
                seq_no,
                primary_term: 1,
            },
        );
    }

    pub fn doc(&self, id: &str) -> Option<StoredDoc> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn doc_json(&self, id: &str) -> Option<Value> {
        self.doc(id)
            .map(|doc| serde_json::from_slice(&doc.source).unwrap())
    }

    /// Make every primary apply fail with a version conflict.
    pub fn fail_with_conflicts(&self) {
        self.conflict_always.store(true, Ordering::Relaxed);
    }

    /// Make every primary apply fail with a generic engine failure.
    pub fn fail_with_engine_errors(&self) {
        self.engine_failure_always.store(true, Ordering::Relaxed);
    }

    /// Make primary applies demand a mapping update until it is cleared.
    pub fn require_mapping_update(&self, update: MappingUpdate) {
        *self.pending_mapping_update.lock().unwrap() = Some(update);
    }

    pub fn clear_mapping_update(&self) {
        *self.pending_mapping_update.lock().unwrap() = None;
    }

    /// Make replica applies demand a mapping update.
    pub fn require_replica_mapping_update(&self, update: MappingUpdate) {
        *self.replica_mapping_update.lock().unwrap() = Some(update);
    }

    fn conflict(&self, id: &str, message: impl Into<String>) -> IndexResult {
        IndexResult::Failure {
            error: ShardWriteError::VersionConflict {
                id: id.to_string(),
                message: message.into(),
            },
            version: MATCH_ANY,
        }
    }

    fn next_location(&self) -> TranslogLocation {
        let location = TranslogLocation::new(1, self.next_offset.fetch_add(1, Ordering::Relaxed));
        self.locations.lock().unwrap().push(location);
        location
    }
}

#[async_trait]
impl ShardWriteEngine for TestEngine {
    async fn apply_index_operation_on_primary(
        &self,
        version: i64,
        _version_type: VersionType,
        id: &str,
        source: Bytes,
        seq_no: i64,
        _primary_term: i64,
        _is_retry: bool,
    ) -> Result<IndexResult, ShardWriteError> {
        self.primary_applies.fetch_add(1, Ordering::Relaxed);
        self.primary_versions.lock().unwrap().push(version);

        if self.conflict_always.load(Ordering::Relaxed) {
            return Ok(self.conflict(id, "injected conflict"));
        }
        if self.engine_failure_always.load(Ordering::Relaxed) {
            return Ok(IndexResult::Failure {
                error: ShardWriteError::Engine(anyhow::anyhow!("translog write failed")),
                version: MATCH_ANY,
            });
        }
        if let Some(update) = self.pending_mapping_update.lock().unwrap().clone() {
            return Ok(IndexResult::MappingUpdateRequired { update });
        }

        let mut docs = self.docs.lock().unwrap();
        let existing = docs.get(id).cloned();
        match &existing {
            Some(stored) => {
                if version == MATCH_DELETED {
                    return Ok(self.conflict(id, "document already exists"));
                }
                if seq_no != UNASSIGNED_SEQ_NO && seq_no != stored.seq_no {
                    return Ok(self.conflict(
                        id,
                        format!("required seq_no [{seq_no}], current seq_no [{}]", stored.seq_no),
                    ));
                }
                if version > 0 && version != stored.version {
                    return Ok(self.conflict(id, "version mismatch"));
                }
            }
            None => {
                if seq_no != UNASSIGNED_SEQ_NO {
                    return Ok(self.conflict(id, "document does not exist"));
                }
            }
        }

        let next_version = existing.map(|d| d.version + 1).unwrap_or(1);
        let next_seq_no = self.next_seq_no.fetch_add(1, Ordering::Relaxed);
        docs.insert(
            id.to_string(),
            StoredDoc {
                source,
                version: next_version,
                seq_no: next_seq_no,
                primary_term: 1,
            },
        );
        Ok(IndexResult::Success {
            seq_no: next_seq_no,
            version: next_version,
            location: self.next_location(),
        })
    }

    async fn apply_index_operation_on_replica(
        &self,
        seq_no: i64,
        version: i64,
        id: &str,
        source: Bytes,
    ) -> Result<IndexResult, ShardWriteError> {
        if let Some(update) = self.replica_mapping_update.lock().unwrap().clone() {
            return Ok(IndexResult::MappingUpdateRequired { update });
        }
        self.docs.lock().unwrap().insert(
            id.to_string(),
            StoredDoc {
                source,
                version,
                seq_no,
                primary_term: 1,
            },
        );
        Ok(IndexResult::Success {
            seq_no,
            version,
            location: self.next_location(),
        })
    }

    async fn lookup_doc(
        &self,
        id: &str,
        _version_type: VersionType,
        seq_no: i64,
        _primary_term: i64,
    ) -> Result<Option<Doc>, ShardWriteError> {
        let docs = self.docs.lock().unwrap();
        let Some(stored) = docs.get(id) else {
            return Ok(None);
        };
        if seq_no != UNASSIGNED_SEQ_NO && seq_no != stored.seq_no {
            return Err(ShardWriteError::VersionConflict {
                id: id.to_string(),
                message: format!(
                    "required seq_no [{seq_no}], current seq_no [{}]",
                    stored.seq_no
                ),
            });
        }
        Ok(Some(Doc {
            id: id.to_string(),
            source: Some(stored.source.clone()),
            version: stored.version,
            seq_no: stored.seq_no,
            primary_term: stored.primary_term,
        }))
    }
}

/// Schema client that records submitted deltas and, by default, clears the
/// engine's pending mapping requirement to simulate the master ack plus
/// cluster-state propagation.
pub struct RecordingSchemaClient {
    engine: Arc<TestEngine>,
    pub updates: Mutex<Vec<(String, MappingUpdate)>>,
    /// When false, acks do not unblock the engine, as when the primary has
    /// not applied the accepted mapping yet.
    pub propagate: AtomicBool,
}

impl RecordingSchemaClient {
    pub fn new(engine: Arc<TestEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            updates: Mutex::new(Vec::new()),
            propagate: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl SchemaUpdateClient for RecordingSchemaClient {
    async fn update_mapping_on_master(
        &self,
        index: &str,
        update: &MappingUpdate,
    ) -> Result<(), ShardWriteError> {
        self.updates
            .lock()
            .unwrap()
            .push((index.to_string(), update.clone()));
        if self.propagate.load(Ordering::Relaxed) {
            self.engine.clear_mapping_update();
        }
        Ok(())
    }
}
