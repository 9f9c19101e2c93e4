//! Planner-independent expressions evaluated on the shard.
//!
//! Update assignments, generated columns, defaults, and CHECK constraints
//! all arrive as `Expr` trees. Evaluation runs against the current document
//! (for column references) and the item's insert values (for `Excluded`
//! references, the values an insert would have written).

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use crate::meta::Scalar;

/// Binary operators supported in shard-side expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Concat,
}

impl BinaryOp {
    pub fn ordinal(self) -> u8 {
        match self {
            BinaryOp::Add => 0,
            BinaryOp::Sub => 1,
            BinaryOp::Mul => 2,
            BinaryOp::Concat => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(BinaryOp::Add),
            1 => Some(BinaryOp::Sub),
            2 => Some(BinaryOp::Mul),
            3 => Some(BinaryOp::Concat),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "subtract",
            BinaryOp::Mul => "multiply",
            BinaryOp::Concat => "concat",
        }
    }
}

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("expression references column [{0}] but no document is available")]
    NoDocument(String),

    #[error("expression references excluded value [{index}] but only {available} insert values are present")]
    ExcludedOutOfRange { index: u32, available: usize },

    #[error("cannot read value of column [{column}]: {message}")]
    ColumnValue { column: String, message: String },

    #[error("cannot {op} values of type [{left}] and [{right}]")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("integer overflow while evaluating {op}")]
    Overflow { op: &'static str },
}

/// Inputs an expression may reference during evaluation.
#[derive(Clone, Copy, Default)]
pub struct EvalInput<'a> {
    /// Current document, for column references.
    pub document: Option<&'a JsonMap<String, Value>>,
    /// Values an insert would have written, for `Excluded` references.
    pub insert_values: &'a [Scalar],
}

/// Evaluable expression shipped with a shard write request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A constant value.
    Literal(Scalar),
    /// Value of a column in the current document, by dotted path.
    Column(String),
    /// Insert value at the given position (the `excluded` row of an
    /// insert-or-update).
    Excluded(u32),
    /// Binary operation over two sub-expressions.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn add(left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn concat(left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Concat,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eval(&self, input: &EvalInput<'_>) -> Result<Scalar, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(column) => {
                let document = input
                    .document
                    .ok_or_else(|| ExprError::NoDocument(column.clone()))?;
                match path_value(document, column) {
                    // An absent column reads as SQL null.
                    None => Ok(Scalar::Null),
                    Some(value) => Scalar::from_json(value).ok_or_else(|| ExprError::ColumnValue {
                        column: column.clone(),
                        message: format!("value {value} has no scalar representation"),
                    }),
                }
            }
            Expr::Excluded(index) => {
                input
                    .insert_values
                    .get(*index as usize)
                    .cloned()
                    .ok_or(ExprError::ExcludedOutOfRange {
                        index: *index,
                        available: input.insert_values.len(),
                    })
            }
            Expr::Binary { op, left, right } => {
                let left = left.eval(input)?;
                let right = right.eval(input)?;
                eval_binary(*op, left, right)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, left: Scalar, right: Scalar) -> Result<Scalar, ExprError> {
    if left.is_null() || right.is_null() {
        return Ok(Scalar::Null);
    }
    match op {
        BinaryOp::Concat => match (left, right) {
            (Scalar::Text(mut a), Scalar::Text(b)) => {
                a.push_str(&b);
                Ok(Scalar::Text(a))
            }
            (left, right) => Err(type_mismatch(op, &left, &right)),
        },
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => match (left, right) {
            (Scalar::Long(a), Scalar::Long(b)) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Concat => unreachable!(),
                };
                result
                    .map(Scalar::Long)
                    .ok_or(ExprError::Overflow { op: op.name() })
            }
            (Scalar::Long(a), Scalar::Double(b)) => Ok(Scalar::Double(apply_f64(op, a as f64, b))),
            (Scalar::Double(a), Scalar::Long(b)) => Ok(Scalar::Double(apply_f64(op, a, b as f64))),
            (Scalar::Double(a), Scalar::Double(b)) => Ok(Scalar::Double(apply_f64(op, a, b))),
            (left, right) => Err(type_mismatch(op, &left, &right)),
        },
    }
}

fn apply_f64(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Concat => unreachable!(),
    }
}

fn type_mismatch(op: BinaryOp, left: &Scalar, right: &Scalar) -> ExprError {
    ExprError::TypeMismatch {
        op: op.name(),
        left: scalar_type_name(left),
        right: scalar_type_name(right),
    }
}

fn scalar_type_name(value: &Scalar) -> &'static str {
    match value {
        Scalar::Null => "null",
        Scalar::Bool(_) => "boolean",
        Scalar::Long(_) => "long",
        Scalar::Double(_) => "double",
        Scalar::Text(_) => "text",
        Scalar::Bytes(_) => "bytes",
    }
}

/// Walk a dotted path into a JSON document.
pub(crate) fn path_value<'a>(document: &'a JsonMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating intermediate objects.
pub(crate) fn set_path_value(document: &mut JsonMap<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().expect("path has at least one segment");
    let mut current = document;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        if !entry.is_object() {
            // A scalar in the middle of the path is replaced by an object.
            *entry = Value::Object(JsonMap::new());
        }
        current = entry.as_object_mut().expect("entry was just made an object");
    }
    current.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> JsonMap<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn literal_and_excluded_resolve_without_a_document() {
        let input = EvalInput {
            document: None,
            insert_values: &[Scalar::Long(7)],
        };
        assert_eq!(Expr::Literal(Scalar::Bool(true)).eval(&input), Ok(Scalar::Bool(true)));
        assert_eq!(Expr::Excluded(0).eval(&input), Ok(Scalar::Long(7)));
        assert_eq!(
            Expr::Excluded(1).eval(&input),
            Err(ExprError::ExcludedOutOfRange { index: 1, available: 1 })
        );
    }

    #[test]
    fn column_reads_nested_paths_and_missing_is_null() {
        let document = doc(json!({"meta": {"count": 3}}));
        let input = EvalInput {
            document: Some(&document),
            insert_values: &[],
        };
        assert_eq!(Expr::Column("meta.count".to_string()).eval(&input), Ok(Scalar::Long(3)));
        assert_eq!(Expr::Column("meta.missing".to_string()).eval(&input), Ok(Scalar::Null));
    }

    #[test]
    fn column_without_document_is_an_error() {
        let err = Expr::Column("a".to_string()).eval(&EvalInput::default()).unwrap_err();
        assert!(matches!(err, ExprError::NoDocument(_)));
    }

    #[test]
    fn arithmetic_promotes_to_double_and_null_propagates() {
        let input = EvalInput::default();
        let sum = Expr::add(Expr::Literal(Scalar::Long(2)), Expr::Literal(Scalar::Double(0.5)));
        assert_eq!(sum.eval(&input), Ok(Scalar::Double(2.5)));
        let with_null = Expr::add(Expr::Literal(Scalar::Long(2)), Expr::Literal(Scalar::Null));
        assert_eq!(with_null.eval(&input), Ok(Scalar::Null));
    }

    #[test]
    fn concat_requires_text() {
        let input = EvalInput::default();
        let ok = Expr::concat(
            Expr::Literal(Scalar::Text("a".to_string())),
            Expr::Literal(Scalar::Text("b".to_string())),
        );
        assert_eq!(ok.eval(&input), Ok(Scalar::Text("ab".to_string())));
        let bad = Expr::concat(Expr::Literal(Scalar::Text("a".to_string())), Expr::Literal(Scalar::Long(1)));
        assert!(matches!(bad.eval(&input), Err(ExprError::TypeMismatch { .. })));
    }

    #[test]
    fn long_overflow_is_reported() {
        let input = EvalInput::default();
        let overflow = Expr::add(Expr::Literal(Scalar::Long(i64::MAX)), Expr::Literal(Scalar::Long(1)));
        assert_eq!(overflow.eval(&input), Err(ExprError::Overflow { op: "add" }));
    }

    #[test]
    fn set_path_creates_nested_objects() {
        let mut document = JsonMap::new();
        set_path_value(&mut document, "a.b.c", json!(1));
        set_path_value(&mut document, "a.b.d", json!(2));
        assert_eq!(Value::Object(document), json!({"a": {"b": {"c": 1, "d": 2}}}));
    }
}
