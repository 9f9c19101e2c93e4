//! Typed error surface for the mapping layer.
//!
//! These variants are the ones callers match on and serialize over the
//! wire; infrastructure faults stay out of this enum.

/// Errors raised while parsing, merging, or installing mappings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// A mapping type name failed validation.
    #[error("{0}")]
    InvalidTypeName(String),

    /// The raw mapping could not be parsed into a document mapping.
    #[error("failed to parse mapping [{type_name}]: {message}")]
    Parse { type_name: String, message: String },

    /// Two mapper definitions for the same path cannot be merged.
    #[error("{0}")]
    MergeConflict(String),

    /// A single merge request carried more than one mapping type.
    #[error("cannot put multiple mappings: {0:?}")]
    MultipleTypes(Vec<String>),

    /// The total-fields limit was exceeded on a mapping update.
    #[error("limit of total fields [{limit}] in index [{index}] has been exceeded")]
    TotalFieldsLimitExceeded { limit: u64, index: String },

    /// An object path exceeded the depth limit on a mapping update.
    #[error(
        "limit of mapping depth [{limit}] in index [{index}] has been exceeded \
         due to object field [{path}]"
    )]
    DepthLimitExceeded {
        limit: u64,
        index: String,
        path: String,
    },

    /// A routing-partitioned index requires the routing field to be required.
    #[error(
        "mapping type [{type_name}] must have routing required for \
         partitioned index [{index}]"
    )]
    RoutingRequired { type_name: String, index: String },

    /// Metadata-driven updates observed inconsistent mapping versions.
    #[error("{0}")]
    MetadataVersion(String),

    /// An installed mapping did not survive a serialize/parse round trip.
    #[error(
        "document mapping serialization result is different from source; \
         source [{original}] result [{result}]"
    )]
    InconsistentSerialization { original: String, result: String },

    /// A settings value was out of range or not a number.
    #[error("invalid value for setting [{key}]: {message}")]
    InvalidSetting { key: String, message: String },
}
