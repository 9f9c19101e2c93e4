//! Document schema (mapping) layer for vellum shards.
//!
//! One `MappingService` per index owns the active document mapping and the
//! field-type lookup derived from it. Mappings are merged under a single
//! writer while readers hold immutable snapshots.

pub mod analysis;
pub mod error;
pub mod field;
pub mod lookup;
pub mod mapping;
pub mod service;
pub mod settings;

pub use analysis::{Analyzer, AnalyzerKind, AnalyzerRegistry};
pub use error::MappingError;
pub use field::{FieldAliasMapper, FieldMapper, FieldType, ObjectMapper, ScalarKind};
pub use lookup::FieldTypeLookup;
pub use mapping::{DocumentMapping, IndexMetadata, MappingSource};
pub use service::{
    is_metadata_field, validate_type_name, MappingAnalyzer, MappingService, MergeReason,
    SINGLE_MAPPING_NAME,
};
pub use settings::{MappingLimits, DEPTH_LIMIT_SETTING, TOTAL_FIELDS_LIMIT_SETTING};
