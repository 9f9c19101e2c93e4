//! The mapping service: parse, merge, validate, and install document
//! mappings for one index.
//!
//! Merges are serialized by a mutex; readers clone an `Arc` snapshot and
//! are never blocked. The field-type lookup and the object-mapper map are
//! replaced together as one snapshot so readers always observe a
//! consistent pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::Value;

use crate::analysis::{Analyzer, AnalyzerKind, AnalyzerRegistry};
use crate::error::MappingError;
use crate::field::{FieldType, ObjectMapper};
use crate::lookup::FieldTypeLookup;
use crate::mapping::{CollectedMappers, DocumentMapping, IndexMetadata};
use crate::settings::MappingLimits;

/// The only legal underscore-prefixed mapping type name.
pub const SINGLE_MAPPING_NAME: &str = "_doc";

/// Hard-coded metadata field names, case sensitive.
const META_FIELDS: &[&str] = &[
    "_id", "_type", "_routing", "_index", "_size", "_timestamp", "_ttl", "_ignored",
];

/// Why a mapping merge is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// Create or update a mapping; limits are enforced.
    Update,
    /// Re-apply an existing mapping after restart or shard movement;
    /// limits are skipped.
    Recovery,
}

/// Whether a field name is one of the reserved metadata fields.
pub fn is_metadata_field(name: &str) -> bool {
    META_FIELDS.contains(&name)
}

#[derive(Default)]
struct MappingState {
    mapping: Option<Arc<DocumentMapping>>,
    field_types: FieldTypeLookup,
    object_mappers: HashMap<String, ObjectMapper>,
    field_mappers: Vec<crate::field::FieldMapper>,
}

/// Per-index owner of the active document mapping.
pub struct MappingService {
    index: String,
    routing_partitioned: bool,
    analyzers: Arc<AnalyzerRegistry>,
    limits: RwLock<MappingLimits>,
    merge_lock: Mutex<()>,
    state: Arc<RwLock<Arc<MappingState>>>,
}

impl MappingService {
    pub fn new(
        index: impl Into<String>,
        analyzers: AnalyzerRegistry,
        limits: MappingLimits,
        routing_partitioned: bool,
    ) -> Self {
        Self {
            index: index.into(),
            routing_partitioned,
            analyzers: Arc::new(analyzers),
            limits: RwLock::new(limits),
            merge_lock: Mutex::new(()),
            state: Arc::new(RwLock::new(Arc::new(MappingState::default()))),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn limits(&self) -> MappingLimits {
        *self.limits.read().expect("limits lock poisoned")
    }

    /// Apply a dynamic settings change.
    pub fn update_limits(&self, limits: MappingLimits) {
        *self.limits.write().expect("limits lock poisoned") = limits;
    }

    /// Parse, merge with the current mapping, validate, and install. On any
    /// error the previous mapping is retained unchanged.
    pub fn merge(
        &self,
        type_name: &str,
        raw: &Value,
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapping>, MappingError> {
        let guard = self.merge_lock.lock().expect("merge lock poisoned");
        let parsed = DocumentMapping::parse(type_name, raw)?;
        self.merge_parsed(&guard, type_name, parsed, reason)
    }

    /// Merge a batch of raw mappings. Only a single type is legal; a second
    /// entry is rejected after the first has parsed, before anything is
    /// installed.
    pub fn merge_all(
        &self,
        mappings: &[(String, Value)],
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapping>, MappingError> {
        let guard = self.merge_lock.lock().expect("merge lock poisoned");
        let mut parsed = None;
        for (type_name, raw) in mappings {
            if parsed.is_some() {
                let types = mappings.iter().map(|(name, _)| name.clone()).collect();
                return Err(MappingError::MultipleTypes(types));
            }
            parsed = Some((type_name.as_str(), DocumentMapping::parse(type_name, raw)?));
        }
        let (type_name, parsed) = parsed.ok_or_else(|| MappingError::Parse {
            type_name: String::new(),
            message: "no mappings to merge".to_string(),
        })?;
        self.merge_parsed(&guard, type_name, parsed, reason)
    }

    fn merge_parsed(
        &self,
        _guard: &MutexGuard<'_, ()>,
        type_name: &str,
        parsed: DocumentMapping,
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapping>, MappingError> {
        validate_type_name(type_name)?;

        let current = self.snapshot();
        let merged = match &current.mapping {
            Some(old) => old.merge(&parsed)?,
            None => parsed,
        };

        let mut collected = merged.collect();
        self.validate_new_mappers(&collected)?;
        self.check_partitioned_index_constraints(&merged)?;

        let field_types = current
            .field_types
            .copy_and_add_all(&collected.fields, &collected.aliases);
        let mut object_mappers = current.object_mappers.clone();
        for object in &collected.objects {
            object_mappers.insert(object.full_path().to_string(), object.clone());
        }

        if reason == MergeReason::Update {
            // These checks only run for API-driven updates; recovery and
            // replica application of an already-accepted mapping skip them.
            // Metadata mappers do not count against the field limit.
            let total = collected.objects.len() + collected.fields.len()
                - collected.metadata_field_count
                + collected.aliases.len();
            self.check_total_fields_limit(total as u64)?;
            self.check_depth_limit(object_mappers.keys())?;
        }

        // Point every field mapper at the canonical type instance owned by
        // the lookup so lookups and mappers agree by identity.
        for mapper in &mut collected.fields {
            if let Some(canonical) = field_types.get(mapper.name()) {
                mapper.update_field_type(canonical.clone());
            }
        }

        let installed = Arc::new(merged);
        let next = Arc::new(MappingState {
            mapping: Some(installed.clone()),
            field_types,
            object_mappers,
            field_mappers: collected.fields,
        });
        *self.state.write().expect("mapping state lock poisoned") = next;

        if installed.source().len() < 512 {
            tracing::debug!(
                index = %self.index,
                mapping_type = type_name,
                source = %installed.source(),
                "installed mapping"
            );
        } else {
            tracing::debug!(
                index = %self.index,
                mapping_type = type_name,
                "installed mapping (source suppressed due to length)"
            );
        }

        if cfg!(debug_assertions) {
            self.verify_serialization(&installed)?;
        }
        debug_assert!(self.mappers_share_lookup_types());

        Ok(installed)
    }

    /// Metadata-driven recovery update. Returns true iff the merged
    /// mapping's re-serialized source differs from the incoming source, in
    /// which case the master must refresh its own version.
    pub fn update_from_metadata(
        &self,
        current_metadata: Option<&IndexMetadata>,
        new_metadata: &IndexMetadata,
    ) -> Result<bool, MappingError> {
        let guard = self.merge_lock.lock().expect("merge lock poisoned");

        let existing = self.snapshot().mapping.clone();
        let needs_merge = match &existing {
            None => true,
            Some(mapping) => mapping.source() != &new_metadata.mapping_source,
        };
        let mut updated = false;
        if needs_merge {
            let parsed = DocumentMapping::parse_source(
                &new_metadata.mapping_type,
                &new_metadata.mapping_source,
            )?;
            if let Err(err) =
                self.merge_parsed(&guard, &new_metadata.mapping_type, parsed, MergeReason::Recovery)
            {
                tracing::warn!(index = %self.index, error = %err, "failed to apply mappings");
                return Err(err);
            }
            updated = true;
        }

        self.check_mapping_version(current_metadata, new_metadata, updated)?;

        let installed = self
            .snapshot()
            .mapping
            .clone()
            .expect("mapping installed by metadata update");
        let requires_refresh = installed.source() != &new_metadata.mapping_source;
        if requires_refresh {
            tracing::debug!(
                index = %self.index,
                mapping_type = %new_metadata.mapping_type,
                "parsed mapping and incoming mapping have different sources; refresh required"
            );
        }
        Ok(requires_refresh)
    }

    fn check_mapping_version(
        &self,
        current: Option<&IndexMetadata>,
        new: &IndexMetadata,
        updated: bool,
    ) -> Result<(), MappingError> {
        let Some(current) = current else {
            return Ok(());
        };
        if current.mapping_version == new.mapping_version {
            if updated {
                return Err(MappingError::MetadataVersion(format!(
                    "expected no mapping changes for unchanged mapping version [{}]",
                    current.mapping_version,
                )));
            }
            if current.mapping_source != new.mapping_source {
                return Err(MappingError::MetadataVersion(format!(
                    "expected current mapping [{}] to be the same as new mapping [{}]",
                    current.mapping_source, new.mapping_source,
                )));
            }
        } else {
            if new.mapping_version <= current.mapping_version {
                return Err(MappingError::MetadataVersion(format!(
                    "expected current mapping version [{}] to be less than new mapping version [{}]",
                    current.mapping_version, new.mapping_version,
                )));
            }
            if !updated {
                return Err(MappingError::MetadataVersion(format!(
                    "expected mapping changes for new mapping version [{}]",
                    new.mapping_version,
                )));
            }
            let installed = self
                .snapshot()
                .mapping
                .clone()
                .expect("mapping installed by metadata update");
            if installed.source() == &current.mapping_source {
                return Err(MappingError::MetadataVersion(format!(
                    "expected new mapping to differ from current mapping for version [{}]",
                    new.mapping_version,
                )));
            }
        }
        Ok(())
    }

    /// The currently installed mapping, if any.
    pub fn document_mapping(&self) -> Option<Arc<DocumentMapping>> {
        self.snapshot().mapping.clone()
    }

    /// Resolve a full field name (or alias) to its field type.
    pub fn field_type(&self, full_name: &str) -> Option<Arc<FieldType>> {
        self.snapshot().field_types.get(full_name).cloned()
    }

    /// Snapshot of the current lookup; survives later merges unchanged.
    pub fn field_types(&self) -> FieldTypeLookup {
        self.snapshot().field_types.clone()
    }

    /// Expand a simple `*` pattern into matching full field names. A
    /// pattern without wildcards is returned verbatim.
    pub fn simple_match_to_full_name(&self, pattern: &str) -> Vec<String> {
        self.snapshot().field_types.simple_match_to_full_name(pattern)
    }

    pub fn object_mapper(&self, path: &str) -> Option<ObjectMapper> {
        self.snapshot().object_mappers.get(path).cloned()
    }

    /// Per-field analyzer view for the given kind.
    pub fn analyzer(&self, kind: AnalyzerKind) -> MappingAnalyzer {
        MappingAnalyzer {
            kind,
            registry: self.analyzers.clone(),
            state: self.state.clone(),
        }
    }

    pub fn index_analyzer(&self) -> MappingAnalyzer {
        self.analyzer(AnalyzerKind::Index)
    }

    pub fn search_analyzer(&self) -> MappingAnalyzer {
        self.analyzer(AnalyzerKind::Search)
    }

    pub fn search_quote_analyzer(&self) -> MappingAnalyzer {
        self.analyzer(AnalyzerKind::SearchQuote)
    }

    fn snapshot(&self) -> Arc<MappingState> {
        self.state.read().expect("mapping state lock poisoned").clone()
    }

    fn validate_new_mappers(&self, collected: &CollectedMappers) -> Result<(), MappingError> {
        let field_names: std::collections::HashSet<&str> =
            collected.fields.iter().map(|f| f.name()).collect();
        let alias_names: std::collections::HashSet<&str> =
            collected.aliases.iter().map(|a| a.name()).collect();

        for alias in &collected.aliases {
            if field_names.contains(alias.name()) {
                return Err(MappingError::MergeConflict(format!(
                    "alias [{}] collides with a concrete field of the same name",
                    alias.name(),
                )));
            }
            if alias.path() == alias.name() {
                return Err(MappingError::MergeConflict(format!(
                    "invalid alias target [{}]: an alias cannot refer to itself",
                    alias.path(),
                )));
            }
            if alias_names.contains(alias.path()) {
                return Err(MappingError::MergeConflict(format!(
                    "invalid alias target [{}]: an alias cannot refer to another alias",
                    alias.path(),
                )));
            }
            if !field_names.contains(alias.path()) {
                return Err(MappingError::MergeConflict(format!(
                    "invalid alias target [{}]: an alias must refer to an existing field",
                    alias.path(),
                )));
            }
        }

        for mapper in &collected.fields {
            for kind in [AnalyzerKind::Index, AnalyzerKind::Search, AnalyzerKind::SearchQuote] {
                if let Some(name) = mapper.field_type().analyzer(kind) {
                    if !self.analyzers.contains(name) {
                        return Err(MappingError::Parse {
                            type_name: String::new(),
                            message: format!(
                                "analyzer [{name}] not found for field [{}]",
                                mapper.name(),
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_partitioned_index_constraints(
        &self,
        mapping: &DocumentMapping,
    ) -> Result<(), MappingError> {
        if self.routing_partitioned && !mapping.routing_required() {
            return Err(MappingError::RoutingRequired {
                type_name: mapping.type_name().to_string(),
                index: self.index.clone(),
            });
        }
        Ok(())
    }

    fn check_total_fields_limit(&self, total: u64) -> Result<(), MappingError> {
        let limit = self.limits().total_fields;
        if total > limit {
            return Err(MappingError::TotalFieldsLimitExceeded {
                limit,
                index: self.index.clone(),
            });
        }
        Ok(())
    }

    fn check_depth_limit<'a>(
        &self,
        object_paths: impl Iterator<Item = &'a String>,
    ) -> Result<(), MappingError> {
        let limit = self.limits().depth;
        for path in object_paths {
            let depth = crate::field::depth_of_path(path);
            if depth > limit {
                return Err(MappingError::DepthLimitExceeded {
                    limit,
                    index: self.index.clone(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn verify_serialization(&self, mapping: &DocumentMapping) -> Result<(), MappingError> {
        let reparsed = DocumentMapping::parse_source(mapping.type_name(), mapping.source())?;
        if reparsed.source() != mapping.source() {
            return Err(MappingError::InconsistentSerialization {
                original: mapping.source().to_string(),
                result: reparsed.source().to_string(),
            });
        }
        Ok(())
    }

    fn mappers_share_lookup_types(&self) -> bool {
        let state = self.snapshot();
        state.field_mappers.iter().all(|mapper| {
            state
                .field_types
                .get(mapper.name())
                .is_some_and(|canonical| Arc::ptr_eq(canonical, mapper.field_type()))
        })
    }
}

/// Analyzer view that dispatches per field through the live lookup and
/// falls back to the registry default.
#[derive(Clone)]
pub struct MappingAnalyzer {
    kind: AnalyzerKind,
    registry: Arc<AnalyzerRegistry>,
    state: Arc<RwLock<Arc<MappingState>>>,
}

impl MappingAnalyzer {
    pub fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    /// Analyzer to use for the given field.
    pub fn for_field(&self, full_name: &str) -> Analyzer {
        let state = self.state.read().expect("mapping state lock poisoned").clone();
        if let Some(field_type) = state.field_types.get(full_name) {
            if let Some(name) = field_type.analyzer(self.kind) {
                if let Some(analyzer) = self.registry.get(name) {
                    return analyzer.clone();
                }
            }
        }
        self.registry.default_for(self.kind).clone()
    }
}

/// Validate a mapping type name against the reserved-name rules.
pub fn validate_type_name(type_name: &str) -> Result<(), MappingError> {
    if type_name.is_empty() {
        return Err(MappingError::InvalidTypeName(
            "mapping type name is empty".to_string(),
        ));
    }
    if type_name.len() > 255 {
        return Err(MappingError::InvalidTypeName(format!(
            "mapping type name [{type_name}] is too long; limit is length 255 but was [{}]",
            type_name.len(),
        )));
    }
    if type_name.starts_with('_') && type_name != SINGLE_MAPPING_NAME {
        return Err(MappingError::InvalidTypeName(format!(
            "mapping type name [{type_name}] can't start with '_' unless it is called [{SINGLE_MAPPING_NAME}]",
        )));
    }
    if type_name.contains('#') {
        return Err(MappingError::InvalidTypeName(format!(
            "mapping type name [{type_name}] should not include '#' in it",
        )));
    }
    if type_name.contains(',') {
        return Err(MappingError::InvalidTypeName(format!(
            "mapping type name [{type_name}] should not include ',' in it",
        )));
    }
    if type_name.starts_with('.') {
        return Err(MappingError::InvalidTypeName(format!(
            "mapping type name [{type_name}] must not start with a '.'",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalyzerRegistry;
    use serde_json::json;

    fn service() -> MappingService {
        MappingService::new("orders", AnalyzerRegistry::standard(), MappingLimits::default(), false)
    }

    #[test]
    fn merge_installs_and_exposes_field_types() {
        let service = service();
        service
            .merge(
                "_doc",
                &json!({"properties": {"title": {"type": "text"}}}),
                MergeReason::Update,
            )
            .unwrap();
        let field_type = service.field_type("title").expect("field installed");
        assert_eq!(field_type.name(), "title");
        assert!(service.document_mapping().is_some());
    }

    #[test]
    fn failed_merge_retains_the_previous_mapping() {
        let service = service();
        service
            .merge(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap();
        let before = service.document_mapping().unwrap();
        let err = service
            .merge(
                "_doc",
                &json!({"properties": {"a": {"type": "text"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::MergeConflict(_)));
        let after = service.document_mapping().unwrap();
        assert_eq!(before.source(), after.source());
    }

    #[test]
    fn lookup_snapshot_survives_later_merges() {
        let service = service();
        service
            .merge(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap();
        let snapshot = service.field_types();
        service
            .merge(
                "_doc",
                &json!({"properties": {"b": {"type": "text"}}}),
                MergeReason::Update,
            )
            .unwrap();
        assert!(snapshot.get("a").is_some());
        assert!(snapshot.get("b").is_none());
        assert!(service.field_types().get("b").is_some());
    }

    #[test]
    fn alias_validation_rejects_missing_targets() {
        let service = service();
        let err = service
            .merge(
                "_doc",
                &json!({"properties": {"headline": {"type": "alias", "path": "title"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(err.to_string().contains("must refer to an existing field"), "{err}");
    }

    #[test]
    fn unknown_analyzer_is_rejected() {
        let service = service();
        let err = service
            .merge(
                "_doc",
                &json!({"properties": {"a": {"type": "text", "analyzer": "nope"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(err.to_string().contains("analyzer [nope] not found"), "{err}");
    }

    #[test]
    fn analyzers_dispatch_per_field_with_default_fallback() {
        let mut registry = AnalyzerRegistry::standard();
        registry.register(crate::analysis::Analyzer::new("german"));
        let service = MappingService::new("orders", registry, MappingLimits::default(), false);
        service
            .merge(
                "_doc",
                &json!({"properties": {
                    "title": {"type": "text", "analyzer": "german"},
                    "body": {"type": "text"}
                }}),
                MergeReason::Update,
            )
            .unwrap();
        let analyzer = service.index_analyzer();
        assert_eq!(analyzer.for_field("title").name(), "german");
        assert_eq!(analyzer.for_field("body").name(), "standard");
        assert_eq!(analyzer.for_field("missing").name(), "standard");
    }

    #[test]
    fn partitioned_index_requires_required_routing() {
        let service =
            MappingService::new("orders", AnalyzerRegistry::standard(), MappingLimits::default(), true);
        let err = service
            .merge(
                "_doc",
                &json!({"properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::RoutingRequired { .. }));
        service
            .merge(
                "_doc",
                &json!({"_routing": {"required": true}, "properties": {"a": {"type": "long"}}}),
                MergeReason::Update,
            )
            .unwrap();
    }

    #[test]
    fn metadata_field_set_is_the_reserved_list() {
        for name in ["_id", "_type", "_routing", "_index", "_size", "_timestamp", "_ttl", "_ignored"] {
            assert!(is_metadata_field(name), "{name}");
        }
        for name in ["_source", "_seq_no", "_version", "_field_names", "id"] {
            assert!(!is_metadata_field(name), "{name}");
        }
    }
}
