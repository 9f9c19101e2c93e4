//! Field types and the mappers collected from a document mapping.
//!
//! Mappers come in three shapes: concrete fields, objects, and aliases.
//! The mapping tree itself is the tagged `MappingNode` enum in the
//! `mapping` module; these are the flat views derived from it.

use std::sync::Arc;

use crate::analysis::AnalyzerKind;

/// Scalar kind a concrete field stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Long,
    Double,
    Text,
    Bytes,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Bool => "boolean",
            ScalarKind::Long => "long",
            ScalarKind::Double => "double",
            ScalarKind::Text => "text",
            ScalarKind::Bytes => "bytes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "boolean" => Some(ScalarKind::Bool),
            "long" => Some(ScalarKind::Long),
            "double" => Some(ScalarKind::Double),
            "text" => Some(ScalarKind::Text),
            "bytes" => Some(ScalarKind::Bytes),
            _ => None,
        }
    }
}

/// Immutable description of one concrete field.
///
/// Instances are shared as `Arc<FieldType>`; the lookup owns the canonical
/// copy and every field mapper in the active mapping points at it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldType {
    name: String,
    kind: ScalarKind,
    index_analyzer: Option<String>,
    search_analyzer: Option<String>,
    search_quote_analyzer: Option<String>,
    nullable: bool,
    generated: bool,
    has_default: bool,
}

impl FieldType {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        kind: ScalarKind,
        index_analyzer: Option<String>,
        search_analyzer: Option<String>,
        search_quote_analyzer: Option<String>,
        nullable: bool,
        generated: bool,
        has_default: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            index_analyzer,
            search_analyzer,
            search_quote_analyzer,
            nullable,
            generated,
            has_default,
        }
    }

    /// Full dotted path of the field.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    /// Analyzer override for the given kind, if the field carries one.
    pub fn analyzer(&self, kind: AnalyzerKind) -> Option<&str> {
        match kind {
            AnalyzerKind::Index => self.index_analyzer.as_deref(),
            AnalyzerKind::Search => self.search_analyzer.as_deref(),
            AnalyzerKind::SearchQuote => self.search_quote_analyzer.as_deref(),
        }
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the field value is produced by a generated expression.
    pub fn generated(&self) -> bool {
        self.generated
    }

    /// Whether the field carries a default expression.
    pub fn has_default(&self) -> bool {
        self.has_default
    }
}

/// Leaf mapper for a concrete field.
#[derive(Clone, Debug)]
pub struct FieldMapper {
    field_type: Arc<FieldType>,
}

impl FieldMapper {
    pub fn new(field_type: Arc<FieldType>) -> Self {
        Self { field_type }
    }

    pub fn name(&self) -> &str {
        self.field_type.name()
    }

    pub fn field_type(&self) -> &Arc<FieldType> {
        &self.field_type
    }

    /// Repoint this mapper at the canonical type instance owned by the
    /// lookup. Only called with a type that is value-equal.
    pub(crate) fn update_field_type(&mut self, canonical: Arc<FieldType>) {
        debug_assert_eq!(*self.field_type, *canonical);
        self.field_type = canonical;
    }
}

/// Alias mapper pointing at a concrete field elsewhere in the mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldAliasMapper {
    name: String,
    path: String,
}

impl FieldAliasMapper {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full dotted path of the aliased field.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Object mapper covering one object path and its direct children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMapper {
    full_path: String,
    children: Vec<String>,
}

impl ObjectMapper {
    pub fn new(full_path: impl Into<String>, children: Vec<String>) -> Self {
        Self {
            full_path: full_path.into(),
            children,
        }
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Ordered names of direct child fields and objects.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Depth of the object path: dot count plus two, counting the root and
    /// the leaf level.
    pub fn depth(&self) -> u64 {
        depth_of_path(&self.full_path)
    }
}

/// Depth of a dotted object path.
pub fn depth_of_path(path: &str) -> u64 {
    let dots = path.bytes().filter(|b| *b == b'.').count() as u64;
    dots + 2
}
