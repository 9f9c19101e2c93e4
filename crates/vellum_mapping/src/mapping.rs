//! Document mapping model: parse, canonical serialization, and merge.
//!
//! A mapping arrives as JSON, optionally wrapped in its type name:
//!
//! ```json
//! {"_doc": {
//!     "_routing": {"required": true},
//!     "properties": {
//!         "title": {"type": "text", "analyzer": "standard"},
//!         "meta":  {"properties": {"author": {"type": "text"}}},
//!         "headline": {"type": "alias", "path": "title"}
//!     }
//! }}
//! ```
//!
//! Parsing normalizes the definition and captures the canonical
//! re-serialization as the mapping source. The source is the identity of a
//! mapping: re-parsing it must reproduce the same bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};

use crate::field::{FieldAliasMapper, FieldMapper, FieldType, ObjectMapper, ScalarKind};
use crate::error::MappingError;

/// Metadata sections a mapping may configure.
const CONFIGURABLE_METADATA: &[&str] = &[
    "_id", "_type", "_routing", "_index", "_size", "_timestamp", "_ttl", "_ignored",
    "_source", "_seq_no", "_version",
];

/// Metadata mappers present on every mapping, with their default options.
const DEFAULT_METADATA: &[(&str, &str)] = &[
    ("_id", "{}"),
    ("_routing", "{\"required\":false}"),
    ("_seq_no", "{}"),
    ("_source", "{}"),
    ("_version", "{}"),
];

/// Canonical serialized bytes of a document mapping.
#[derive(Clone, PartialEq, Eq)]
pub struct MappingSource(Arc<[u8]>);

impl MappingSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into())
    }

    pub fn from_value(value: &Value) -> Self {
        // serde_json maps are ordered, so this is canonical.
        Self(serde_json::to_vec(value).expect("mapping value is valid json").into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Result<Value, MappingError> {
        serde_json::from_slice(&self.0).map_err(|err| MappingError::Parse {
            type_name: String::new(),
            message: format!("mapping source is not valid json: {err}"),
        })
    }
}

impl fmt::Debug for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappingSource({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Parsed definition of one concrete field, before it is given a full path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub kind: ScalarKind,
    pub index_analyzer: Option<String>,
    pub search_analyzer: Option<String>,
    pub search_quote_analyzer: Option<String>,
    pub nullable: bool,
    pub generated: bool,
    pub has_default: bool,
}

impl FieldDef {
    fn to_field_type(&self, full_name: &str) -> FieldType {
        FieldType::new(
            full_name,
            self.kind,
            self.index_analyzer.clone(),
            self.search_analyzer.clone(),
            self.search_quote_analyzer.clone(),
            self.nullable,
            self.generated,
            self.has_default,
        )
    }
}

/// One node of the mapping tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MappingNode {
    Object { children: BTreeMap<String, MappingNode> },
    Field(FieldDef),
    Alias { path: String },
}

/// Mappers collected from a full mapping tree.
#[derive(Debug, Default)]
pub struct CollectedMappers {
    pub objects: Vec<ObjectMapper>,
    pub fields: Vec<FieldMapper>,
    pub aliases: Vec<FieldAliasMapper>,
    /// How many of `fields` are metadata mappers.
    pub metadata_field_count: usize,
}

/// Immutable per-type document mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentMapping {
    type_name: String,
    metadata: BTreeMap<String, JsonMap<String, Value>>,
    root: BTreeMap<String, MappingNode>,
    source: MappingSource,
}

impl DocumentMapping {
    /// Parse a raw mapping value for the given type.
    pub fn parse(type_name: &str, raw: &Value) -> Result<Self, MappingError> {
        let map = raw.as_object().ok_or_else(|| parse_err(type_name, "mapping definition must be an object"))?;

        // Strip the type wrapper when present.
        let body = match map.get(type_name) {
            Some(inner) if map.len() == 1 => inner
                .as_object()
                .ok_or_else(|| parse_err(type_name, "mapping body must be an object"))?,
            _ => map,
        };

        let mut metadata = default_metadata();
        let mut root = BTreeMap::new();
        for (key, value) in body {
            if key.starts_with('_') {
                if !CONFIGURABLE_METADATA.contains(&key.as_str()) {
                    return Err(parse_err(
                        type_name,
                        format!("unknown metadata field [{key}]"),
                    ));
                }
                let options = value.as_object().ok_or_else(|| {
                    parse_err(type_name, format!("metadata field [{key}] must be an object"))
                })?;
                if key == "_routing" {
                    if let Some(required) = options.get("required") {
                        if !required.is_boolean() {
                            return Err(parse_err(
                                type_name,
                                "[_routing.required] must be a boolean",
                            ));
                        }
                    }
                }
                let entry = metadata.entry(key.clone()).or_default();
                for (opt, opt_value) in options {
                    entry.insert(opt.clone(), opt_value.clone());
                }
            } else if key == "properties" {
                let properties = value.as_object().ok_or_else(|| {
                    parse_err(type_name, "[properties] must be an object")
                })?;
                for (name, def) in properties {
                    let node = parse_node(type_name, name, def)?;
                    root.insert(name.clone(), node);
                }
            } else {
                return Err(parse_err(
                    type_name,
                    format!("unsupported mapping key [{key}]"),
                ));
            }
        }

        Ok(Self::from_parts(type_name.to_string(), metadata, root))
    }

    /// Parse the canonical source bytes back into a mapping.
    pub fn parse_source(type_name: &str, source: &MappingSource) -> Result<Self, MappingError> {
        let value = serde_json::from_slice(source.as_bytes()).map_err(|err| {
            parse_err(type_name, format!("mapping source is not valid json: {err}"))
        })?;
        Self::parse(type_name, &value)
    }

    fn from_parts(
        type_name: String,
        metadata: BTreeMap<String, JsonMap<String, Value>>,
        root: BTreeMap<String, MappingNode>,
    ) -> Self {
        let value = mapping_to_value(&type_name, &metadata, &root);
        let source = MappingSource::from_value(&value);
        Self {
            type_name,
            metadata,
            root,
            source,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Canonical serialized source of this mapping.
    pub fn source(&self) -> &MappingSource {
        &self.source
    }

    /// Whether the routing metadata field is marked required.
    pub fn routing_required(&self) -> bool {
        self.metadata
            .get("_routing")
            .and_then(|options| options.get("required"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Merge an incoming mapping into this one, surfacing conflicts as
    /// errors. Neither input is modified.
    pub fn merge(&self, incoming: &DocumentMapping) -> Result<DocumentMapping, MappingError> {
        if self.type_name != incoming.type_name {
            return Err(MappingError::MergeConflict(format!(
                "rejecting mapping update as the final mapping would have more \
                 than 1 type: [{}, {}]",
                self.type_name, incoming.type_name,
            )));
        }

        let mut metadata = self.metadata.clone();
        for (name, options) in &incoming.metadata {
            let entry = metadata.entry(name.clone()).or_default();
            for (opt, value) in options {
                entry.insert(opt.clone(), value.clone());
            }
        }

        let root = merge_children("", &self.root, &incoming.root)?;
        Ok(Self::from_parts(self.type_name.clone(), metadata, root))
    }

    /// Collect object, field, and alias mappers from the mapping tree.
    /// Metadata mappers are emitted first as field mappers.
    pub fn collect(&self) -> CollectedMappers {
        let mut collected = CollectedMappers::default();
        for name in self.metadata.keys() {
            let field_type = metadata_field_type(name);
            collected.fields.push(FieldMapper::new(Arc::new(field_type)));
        }
        collected.metadata_field_count = collected.fields.len();
        collect_children("", &self.root, &mut collected);
        collected
    }
}

/// Index-level metadata consumed by the recovery update path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMetadata {
    pub index: String,
    pub mapping_version: u64,
    pub mapping_type: String,
    pub mapping_source: MappingSource,
}

fn parse_err(type_name: &str, message: impl Into<String>) -> MappingError {
    MappingError::Parse {
        type_name: type_name.to_string(),
        message: message.into(),
    }
}

fn default_metadata() -> BTreeMap<String, JsonMap<String, Value>> {
    DEFAULT_METADATA
        .iter()
        .map(|(name, options)| {
            let map = serde_json::from_str(options).expect("default metadata options are valid json");
            (name.to_string(), map)
        })
        .collect()
}

/// Field type backing one metadata mapper.
fn metadata_field_type(name: &str) -> FieldType {
    let kind = match name {
        "_seq_no" | "_version" | "_size" | "_timestamp" | "_ttl" => ScalarKind::Long,
        "_source" => ScalarKind::Bytes,
        _ => ScalarKind::Text,
    };
    FieldType::new(name, kind, None, None, None, false, false, false)
}

fn parse_node(type_name: &str, name: &str, def: &Value) -> Result<MappingNode, MappingError> {
    if name.is_empty() {
        return Err(parse_err(type_name, "field name cannot be an empty string"));
    }
    if name.contains('.') {
        return Err(parse_err(
            type_name,
            format!("field name [{name}] cannot contain '.'"),
        ));
    }
    let def = def
        .as_object()
        .ok_or_else(|| parse_err(type_name, format!("definition of field [{name}] must be an object")))?;

    if let Some(properties) = def.get("properties") {
        for key in def.keys() {
            if key != "properties" && key != "type" {
                return Err(parse_err(
                    type_name,
                    format!("unsupported parameter [{key}] on object field [{name}]"),
                ));
            }
        }
        if let Some(declared) = def.get("type") {
            if declared.as_str() != Some("object") {
                return Err(parse_err(
                    type_name,
                    format!("object field [{name}] cannot declare type [{declared}]"),
                ));
            }
        }
        let properties = properties
            .as_object()
            .ok_or_else(|| parse_err(type_name, format!("[properties] of [{name}] must be an object")))?;
        let mut children = BTreeMap::new();
        for (child_name, child_def) in properties {
            children.insert(child_name.clone(), parse_node(type_name, child_name, child_def)?);
        }
        return Ok(MappingNode::Object { children });
    }

    let declared = def
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err(type_name, format!("field [{name}] must declare a type")))?;

    if declared == "alias" {
        for key in def.keys() {
            if key != "type" && key != "path" {
                return Err(parse_err(
                    type_name,
                    format!("unsupported parameter [{key}] on alias field [{name}]"),
                ));
            }
        }
        let path = def
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| parse_err(type_name, format!("alias field [{name}] must declare a path")))?;
        return Ok(MappingNode::Alias {
            path: path.to_string(),
        });
    }

    let kind = ScalarKind::parse(declared).ok_or_else(|| {
        parse_err(
            type_name,
            format!("no handler for type [{declared}] declared on field [{name}]"),
        )
    })?;
    for key in def.keys() {
        match key.as_str() {
            "type" | "analyzer" | "search_analyzer" | "search_quote_analyzer" | "nullable"
            | "generated" | "default" => {}
            other => {
                return Err(parse_err(
                    type_name,
                    format!("unsupported parameter [{other}] on field [{name}]"),
                ));
            }
        }
    }
    Ok(MappingNode::Field(FieldDef {
        kind,
        index_analyzer: opt_string(type_name, name, def, "analyzer")?,
        search_analyzer: opt_string(type_name, name, def, "search_analyzer")?,
        search_quote_analyzer: opt_string(type_name, name, def, "search_quote_analyzer")?,
        nullable: opt_bool(type_name, name, def, "nullable")?.unwrap_or(true),
        generated: opt_bool(type_name, name, def, "generated")?.unwrap_or(false),
        has_default: opt_bool(type_name, name, def, "default")?.unwrap_or(false),
    }))
}

fn opt_string(
    type_name: &str,
    field: &str,
    def: &JsonMap<String, Value>,
    key: &str,
) -> Result<Option<String>, MappingError> {
    match def.get(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(parse_err(
            type_name,
            format!("[{key}] of field [{field}] must be a string"),
        )),
    }
}

fn opt_bool(
    type_name: &str,
    field: &str,
    def: &JsonMap<String, Value>,
    key: &str,
) -> Result<Option<bool>, MappingError> {
    match def.get(key) {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(parse_err(
            type_name,
            format!("[{key}] of field [{field}] must be a boolean"),
        )),
    }
}

fn merge_children(
    prefix: &str,
    old: &BTreeMap<String, MappingNode>,
    new: &BTreeMap<String, MappingNode>,
) -> Result<BTreeMap<String, MappingNode>, MappingError> {
    let mut merged = old.clone();
    for (name, incoming) in new {
        let full = join_path(prefix, name);
        match merged.get(name) {
            None => {
                merged.insert(name.clone(), incoming.clone());
            }
            Some(existing) => {
                let node = merge_nodes(&full, existing, incoming)?;
                merged.insert(name.clone(), node);
            }
        }
    }
    Ok(merged)
}

fn merge_nodes(
    path: &str,
    old: &MappingNode,
    new: &MappingNode,
) -> Result<MappingNode, MappingError> {
    match (old, new) {
        (MappingNode::Object { children: old_children }, MappingNode::Object { children: new_children }) => {
            Ok(MappingNode::Object {
                children: merge_children(path, old_children, new_children)?,
            })
        }
        (MappingNode::Field(old_def), MappingNode::Field(new_def)) => {
            if old_def.kind != new_def.kind {
                return Err(MappingError::MergeConflict(format!(
                    "mapper [{path}] cannot be changed from type [{}] to [{}]",
                    old_def.kind.as_str(),
                    new_def.kind.as_str(),
                )));
            }
            Ok(MappingNode::Field(new_def.clone()))
        }
        (MappingNode::Alias { .. }, MappingNode::Alias { path: new_target }) => Ok(MappingNode::Alias {
            path: new_target.clone(),
        }),
        (old_node, new_node) => Err(MappingError::MergeConflict(format!(
            "mapper [{path}] cannot be changed from [{}] to [{}]",
            node_kind(old_node),
            node_kind(new_node),
        ))),
    }
}

fn node_kind(node: &MappingNode) -> &'static str {
    match node {
        MappingNode::Object { .. } => "object",
        MappingNode::Field(_) => "field",
        MappingNode::Alias { .. } => "alias",
    }
}

fn collect_children(prefix: &str, children: &BTreeMap<String, MappingNode>, out: &mut CollectedMappers) {
    for (name, node) in children {
        let full = join_path(prefix, name);
        match node {
            MappingNode::Object { children } => {
                out.objects.push(ObjectMapper::new(
                    full.clone(),
                    children.keys().cloned().collect(),
                ));
                collect_children(&full, children, out);
            }
            MappingNode::Field(def) => {
                out.fields.push(FieldMapper::new(Arc::new(def.to_field_type(&full))));
            }
            MappingNode::Alias { path } => {
                out.aliases.push(FieldAliasMapper::new(full, path.clone()));
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn mapping_to_value(
    type_name: &str,
    metadata: &BTreeMap<String, JsonMap<String, Value>>,
    root: &BTreeMap<String, MappingNode>,
) -> Value {
    let mut body = JsonMap::new();
    for (name, options) in metadata {
        body.insert(name.clone(), Value::Object(options.clone()));
    }
    body.insert("properties".to_string(), children_to_value(root));
    let mut wrapper = JsonMap::new();
    wrapper.insert(type_name.to_string(), Value::Object(body));
    Value::Object(wrapper)
}

fn children_to_value(children: &BTreeMap<String, MappingNode>) -> Value {
    let mut out = JsonMap::new();
    for (name, node) in children {
        out.insert(name.clone(), node_to_value(node));
    }
    Value::Object(out)
}

fn node_to_value(node: &MappingNode) -> Value {
    let mut def = JsonMap::new();
    match node {
        MappingNode::Object { children } => {
            def.insert("properties".to_string(), children_to_value(children));
        }
        MappingNode::Alias { path } => {
            def.insert("path".to_string(), Value::String(path.clone()));
            def.insert("type".to_string(), Value::String("alias".to_string()));
        }
        MappingNode::Field(field) => {
            def.insert("type".to_string(), Value::String(field.kind.as_str().to_string()));
            if let Some(analyzer) = &field.index_analyzer {
                def.insert("analyzer".to_string(), Value::String(analyzer.clone()));
            }
            if let Some(analyzer) = &field.search_analyzer {
                def.insert("search_analyzer".to_string(), Value::String(analyzer.clone()));
            }
            if let Some(analyzer) = &field.search_quote_analyzer {
                def.insert(
                    "search_quote_analyzer".to_string(),
                    Value::String(analyzer.clone()),
                );
            }
            if !field.nullable {
                def.insert("nullable".to_string(), Value::Bool(false));
            }
            if field.generated {
                def.insert("generated".to_string(), Value::Bool(true));
            }
            if field.has_default {
                def.insert("default".to_string(), Value::Bool(true));
            }
        }
    }
    Value::Object(def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> DocumentMapping {
        DocumentMapping::parse("_doc", &value).expect("valid mapping")
    }

    #[test]
    fn parse_round_trips_byte_identically() {
        let parsed = mapping(json!({
            "_doc": {
                "_routing": {"required": true},
                "properties": {
                    "title": {"type": "text", "analyzer": "standard"},
                    "meta": {"properties": {"author": {"type": "text"}}},
                    "headline": {"type": "alias", "path": "title"}
                }
            }
        }));
        let reparsed = DocumentMapping::parse_source("_doc", parsed.source()).unwrap();
        assert_eq!(reparsed.source(), parsed.source());
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn type_wrapper_is_optional() {
        let wrapped = mapping(json!({"_doc": {"properties": {"a": {"type": "long"}}}}));
        let bare = mapping(json!({"properties": {"a": {"type": "long"}}}));
        assert_eq!(wrapped.source(), bare.source());
    }

    #[test]
    fn unknown_field_parameter_is_rejected() {
        let err = DocumentMapping::parse(
            "_doc",
            &json!({"properties": {"a": {"type": "long", "fielddata": true}}}),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Parse { .. }), "{err}");
    }

    #[test]
    fn dotted_field_names_are_rejected() {
        let err = DocumentMapping::parse(
            "_doc",
            &json!({"properties": {"a.b": {"type": "long"}}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot contain"), "{err}");
    }

    #[test]
    fn merge_adds_fields_and_keeps_existing() {
        let old = mapping(json!({"properties": {"a": {"type": "long"}}}));
        let new = mapping(json!({"properties": {"b": {"type": "text"}}}));
        let merged = old.merge(&new).unwrap();
        let collected = merged.collect();
        let names: Vec<&str> = collected
            .fields
            .iter()
            .skip(collected.metadata_field_count)
            .map(|f| f.name())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn merge_rejects_field_kind_change() {
        let old = mapping(json!({"properties": {"a": {"type": "long"}}}));
        let new = mapping(json!({"properties": {"a": {"type": "text"}}}));
        let err = old.merge(&new).unwrap_err();
        assert!(err.to_string().contains("cannot be changed from type"), "{err}");
    }

    #[test]
    fn merge_recurses_into_objects() {
        let old = mapping(json!({"properties": {"meta": {"properties": {"a": {"type": "long"}}}}}));
        let new = mapping(json!({"properties": {"meta": {"properties": {"b": {"type": "text"}}}}}));
        let merged = old.merge(&new).unwrap();
        let collected = merged.collect();
        assert_eq!(collected.objects.len(), 1);
        assert_eq!(collected.objects[0].children(), ["a", "b"]);
    }

    #[test]
    fn routing_required_reads_the_metadata_section() {
        let off = mapping(json!({"properties": {}}));
        let on = mapping(json!({"_routing": {"required": true}, "properties": {}}));
        assert!(!off.routing_required());
        assert!(on.routing_required());
    }

    #[test]
    fn collect_counts_metadata_separately() {
        let parsed = mapping(json!({"properties": {"a": {"type": "long"}}}));
        let collected = parsed.collect();
        assert_eq!(collected.metadata_field_count, 5);
        assert_eq!(collected.fields.len(), 6);
        assert!(collected.objects.is_empty());
    }
}
