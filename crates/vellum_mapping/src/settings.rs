//! Dynamic mapping limits read from the index settings map.

use serde_json::Value;

use crate::error::MappingError;

/// Setting key bounding the number of mappers in a mapping.
pub const TOTAL_FIELDS_LIMIT_SETTING: &str = "index.mapping.total_fields.limit";
/// Setting key bounding the depth of object paths.
pub const DEPTH_LIMIT_SETTING: &str = "index.mapping.depth.limit";

pub const DEFAULT_TOTAL_FIELDS_LIMIT: u64 = 1000;
pub const DEFAULT_DEPTH_LIMIT: u64 = 20;
const MIN_DEPTH_LIMIT: u64 = 1;

/// Limits applied when a mapping merge runs for an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingLimits {
    pub total_fields: u64,
    pub depth: u64,
}

impl Default for MappingLimits {
    fn default() -> Self {
        Self {
            total_fields: DEFAULT_TOTAL_FIELDS_LIMIT,
            depth: DEFAULT_DEPTH_LIMIT,
        }
    }
}

impl MappingLimits {
    /// Read the limits out of a flat settings object, falling back to the
    /// defaults for absent keys.
    pub fn from_settings(settings: &Value) -> Result<Self, MappingError> {
        let total_fields =
            read_limit(settings, TOTAL_FIELDS_LIMIT_SETTING, DEFAULT_TOTAL_FIELDS_LIMIT, 0)?;
        let depth = read_limit(settings, DEPTH_LIMIT_SETTING, DEFAULT_DEPTH_LIMIT, MIN_DEPTH_LIMIT)?;
        Ok(Self {
            total_fields,
            depth,
        })
    }

    pub fn with_total_fields(mut self, total_fields: u64) -> Self {
        self.total_fields = total_fields;
        self
    }

    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }
}

fn read_limit(settings: &Value, key: &str, default: u64, min: u64) -> Result<u64, MappingError> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    let value = match raw {
        // Negative or fractional numbers have no u64 representation.
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse::<u64>().ok(),
        _ => None,
    };
    let value = value.ok_or_else(|| MappingError::InvalidSetting {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got {raw}"),
    })?;
    if value < min {
        return Err(MappingError::InvalidSetting {
            key: key.to_string(),
            message: format!("must be >= {min}, got {value}"),
        });
    }
    Ok(value)
}
