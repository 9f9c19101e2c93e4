//! Table metadata consumed by the write path: column references, check
//! constraints, and the session settings travelling with a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vellum_mapping::{DocumentMapping, ScalarKind};

use crate::expr::Expr;

/// Storage type of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Long,
    Double,
    Text,
    Bytes,
}

impl DataType {
    /// Stable wire ordinal of the type.
    pub fn ordinal(self) -> u8 {
        match self {
            DataType::Bool => 0,
            DataType::Long => 1,
            DataType::Double => 2,
            DataType::Text => 3,
            DataType::Bytes => 4,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(DataType::Bool),
            1 => Some(DataType::Long),
            2 => Some(DataType::Double),
            3 => Some(DataType::Text),
            4 => Some(DataType::Bytes),
            _ => None,
        }
    }
}

impl From<ScalarKind> for DataType {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => DataType::Bool,
            ScalarKind::Long => DataType::Long,
            ScalarKind::Double => DataType::Double,
            ScalarKind::Text => DataType::Text,
            ScalarKind::Bytes => DataType::Bytes,
        }
    }
}

/// One concrete value flowing through the write path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Bool),
            Scalar::Long(_) => Some(DataType::Long),
            Scalar::Double(_) => Some(DataType::Double),
            Scalar::Text(_) => Some(DataType::Text),
            Scalar::Bytes(_) => Some(DataType::Bytes),
        }
    }

    /// JSON representation used in generated document sources.
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(value) => Value::Bool(*value),
            Scalar::Long(value) => Value::from(*value),
            Scalar::Double(value) => Value::from(*value),
            Scalar::Text(value) => Value::String(value.clone()),
            Scalar::Bytes(value) => Value::from(value.clone()),
        }
    }

    /// Read a scalar back out of a JSON document value. Non-scalar shapes
    /// (objects, mixed arrays) have no scalar representation.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(number) => {
                if let Some(long) = number.as_i64() {
                    Some(Scalar::Long(long))
                } else {
                    number.as_f64().map(Scalar::Double)
                }
            }
            Value::String(text) => Some(Scalar::Text(text.clone())),
            Value::Array(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    let byte = item.as_u64().filter(|v| *v <= u8::MAX as u64)?;
                    bytes.push(byte as u8);
                }
                Some(Scalar::Bytes(bytes))
            }
            Value::Object(_) => None,
        }
    }
}

/// Column reference streamed with insert requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub column: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub generated: Option<Expr>,
    pub default: Option<Expr>,
    pub position: u32,
}

impl Reference {
    pub fn new(column: impl Into<String>, data_type: DataType, position: u32) -> Self {
        Self {
            column: column.into(),
            data_type,
            nullable: true,
            generated: None,
            default: None,
            position,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn generated(mut self, expression: Expr) -> Self {
        self.generated = Some(expression);
        self
    }

    pub fn with_default(mut self, expression: Expr) -> Self {
        self.default = Some(expression);
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

/// Named CHECK constraint evaluated against a full row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: String,
    pub expression: Expr,
}

/// Table description the source generators work against.
#[derive(Clone, Debug, PartialEq)]
pub struct TableInfo {
    relation: String,
    columns: Vec<Reference>,
    primary_keys: Vec<String>,
    routing_column: Option<String>,
    checks: Vec<CheckConstraint>,
}

impl TableInfo {
    pub fn new(relation: impl Into<String>, columns: Vec<Reference>) -> Self {
        Self {
            relation: relation.into(),
            columns,
            primary_keys: Vec::new(),
            routing_column: None,
            checks: Vec::new(),
        }
    }

    /// Derive column references from an installed document mapping.
    /// Generated and default expressions are markers in the mapping, so the
    /// resulting references carry none; callers attach them afterwards.
    pub fn from_mapping(relation: impl Into<String>, mapping: &DocumentMapping) -> Self {
        let collected = mapping.collect();
        let columns = collected
            .fields
            .iter()
            .skip(collected.metadata_field_count)
            .enumerate()
            .map(|(position, mapper)| {
                let field_type = mapper.field_type();
                Reference {
                    column: field_type.name().to_string(),
                    data_type: field_type.kind().into(),
                    nullable: field_type.nullable(),
                    generated: None,
                    default: None,
                    position: position as u32,
                }
            })
            .collect();
        Self::new(relation, columns)
    }

    pub fn with_primary_keys(mut self, primary_keys: Vec<String>) -> Self {
        self.primary_keys = primary_keys;
        self
    }

    pub fn with_routing_column(mut self, column: impl Into<String>) -> Self {
        self.routing_column = Some(column.into());
        self
    }

    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn columns(&self) -> &[Reference] {
        &self.columns
    }

    pub fn checks(&self) -> &[CheckConstraint] {
        &self.checks
    }

    pub fn reference(&self, column: &str) -> Option<&Reference> {
        self.columns.iter().find(|r| r.column == column)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk == column)
    }

    pub fn is_routing_column(&self, column: &str) -> bool {
        self.routing_column.as_deref() == Some(column)
    }

    /// Primary-key and routing columns are NOT NULL even when declared
    /// nullable.
    pub fn column_must_not_be_null(&self, reference: &Reference) -> bool {
        !reference.nullable
            || self.is_primary_key(&reference.column)
            || self.is_routing_column(&reference.column)
    }

    /// Required columns a statement does not target: not nullable, not
    /// generated, without a default, and absent from `target_columns`.
    pub fn unused_non_generated_columns(&self, target_columns: &[Reference]) -> Vec<String> {
        let targeted: std::collections::HashSet<&str> =
            target_columns.iter().map(|r| r.column.as_str()).collect();
        self.columns
            .iter()
            .filter(|r| !r.nullable && !r.is_generated() && r.default.is_none())
            .filter(|r| !targeted.contains(r.column.as_str()))
            .map(|r| r.column.clone())
            .collect()
    }
}

/// Session settings carried with every shard write request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub user: String,
    pub search_path: Vec<String>,
    pub hash_join_enabled: bool,
}

impl SessionSettings {
    pub fn new(user: impl Into<String>, search_path: Vec<String>) -> Self {
        Self {
            user: user.into(),
            search_path,
            hash_join_enabled: true,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::new("vellum", vec!["doc".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_table() -> TableInfo {
        TableInfo::new(
            "doc.orders",
            vec![
                Reference::new("id", DataType::Long, 0).not_null(),
                Reference::new("customer", DataType::Text, 1).not_null(),
                Reference::new("total", DataType::Double, 2),
                Reference::new("discount", DataType::Double, 3)
                    .with_default(Expr::Literal(Scalar::Double(0.0))),
            ],
        )
        .with_primary_keys(vec!["id".to_string()])
    }

    #[test]
    fn primary_key_columns_are_implicitly_not_null() {
        let table = TableInfo::new("doc.t", vec![Reference::new("id", DataType::Long, 0)])
            .with_primary_keys(vec!["id".to_string()]);
        let id = table.reference("id").unwrap();
        assert!(id.nullable);
        assert!(table.column_must_not_be_null(id));
    }

    #[test]
    fn unused_non_generated_columns_skips_targeted_defaults_and_generated() {
        let table = orders_table();
        let targets = [Reference::new("id", DataType::Long, 0)];
        // `customer` is not-null and untargeted; `discount` has a default.
        assert_eq!(table.unused_non_generated_columns(&targets), ["customer"]);
    }

    #[test]
    fn scalar_json_round_trip() {
        for scalar in [
            Scalar::Null,
            Scalar::Bool(true),
            Scalar::Long(-42),
            Scalar::Double(2.5),
            Scalar::Text("ok".to_string()),
            Scalar::Bytes(vec![1, 2, 255]),
        ] {
            let json = scalar.to_json();
            assert_eq!(Scalar::from_json(&json), Some(scalar));
        }
    }

    #[test]
    fn table_from_mapping_carries_types_and_nullability() {
        let mapping = DocumentMapping::parse(
            "_doc",
            &serde_json::json!({"properties": {
                "id": {"type": "long", "nullable": false},
                "name": {"type": "text"}
            }}),
        )
        .unwrap();
        let table = TableInfo::from_mapping("doc.users", &mapping);
        assert_eq!(table.columns().len(), 2);
        let id = table.reference("id").unwrap();
        assert_eq!(id.data_type, DataType::Long);
        assert!(!id.nullable);
        assert!(table.reference("name").unwrap().nullable);
    }
}
