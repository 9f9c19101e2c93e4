//! Generation of the canonical document payload for inserts and updates.
//!
//! Both generators emit a self-describing JSON object with dotted column
//! names expanded into nested objects, ready for the mapping parser.
//! Constraint checks run against the fully assembled row, so generated
//! columns and defaults participate.

use bytes::Bytes;
use serde_json::{Map as JsonMap, Value};

use crate::engine::Doc;
use crate::expr::{path_value, set_path_value, EvalInput, Expr, ExprError};
use crate::meta::{Reference, Scalar, TableInfo};

/// Whether user-supplied values for generated columns are checked against
/// the computed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratedValidation {
    None,
    ValueMatch,
}

/// Errors raised while generating a document source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceGenError {
    #[error("\"{column}\" must not be null")]
    NotNull { column: String },

    #[error(
        "given value [{given}] for generated column [{column}] does not match \
         calculation [{computed}]"
    )]
    GeneratedMismatch {
        column: String,
        given: String,
        computed: String,
    },

    #[error("failed CHECK constraint [{name}]")]
    CheckFailed { name: String },

    #[error("number of insert values [{got}] does not match the insert columns [{expected}]")]
    ColumnCount { expected: usize, got: usize },

    #[error("number of update assignments [{got}] does not match the update columns [{expected}]")]
    AssignmentCount { expected: usize, got: usize },

    #[error("current source of document [{id}] is not a json object")]
    InvalidCurrentDocument { id: String },

    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// Builds insert payloads from values aligned with the insert columns.
pub struct InsertSourceGen<'a> {
    table: &'a TableInfo,
    columns: Vec<Reference>,
    validation: GeneratedValidation,
}

impl<'a> InsertSourceGen<'a> {
    pub fn new(table: &'a TableInfo, columns: &[Reference], validation: GeneratedValidation) -> Self {
        Self {
            table,
            columns: columns.to_vec(),
            validation,
        }
    }

    /// Enforce NOT NULL, generated-column, and CHECK constraints against
    /// the row these values would produce.
    pub fn check_constraints(&self, values: &[Scalar]) -> Result<(), SourceGenError> {
        let row = self.assemble(values)?;

        if self.validation == GeneratedValidation::ValueMatch {
            self.validate_generated_values(values, &row)?;
        }

        for reference in self.table.columns() {
            if self.table.column_must_not_be_null(reference) {
                let value = path_value(&row, &reference.column);
                if value.is_none() || value == Some(&Value::Null) {
                    return Err(SourceGenError::NotNull {
                        column: reference.column.clone(),
                    });
                }
            }
        }

        check_row_constraints(self.table, &row)
    }

    /// Produce the canonical document bytes for the given values.
    pub fn generate_source(&self, values: &[Scalar]) -> Result<Bytes, SourceGenError> {
        let row = self.assemble(values)?;
        Ok(Bytes::from(
            serde_json::to_vec(&Value::Object(row)).expect("row is valid json"),
        ))
    }

    /// Assemble the full row: provided values, then defaults for absent
    /// columns, then computed generated columns.
    fn assemble(&self, values: &[Scalar]) -> Result<JsonMap<String, Value>, SourceGenError> {
        if values.len() != self.columns.len() {
            return Err(SourceGenError::ColumnCount {
                expected: self.columns.len(),
                got: values.len(),
            });
        }

        let mut row = JsonMap::new();
        for (reference, value) in self.columns.iter().zip(values) {
            set_path_value(&mut row, &reference.column, value.to_json());
        }

        for reference in self.table.columns() {
            if path_value(&row, &reference.column).is_some() {
                continue;
            }
            if let Some(default) = &reference.default {
                let input = EvalInput {
                    document: Some(&row),
                    insert_values: values,
                };
                let value = default.eval(&input)?;
                set_path_value(&mut row, &reference.column, value.to_json());
            }
        }

        for reference in self.table.columns() {
            let Some(generated) = &reference.generated else {
                continue;
            };
            if path_value(&row, &reference.column).is_some() {
                // A supplied value wins; value-match validation compares it
                // against the calculation separately.
                continue;
            }
            let input = EvalInput {
                document: Some(&row),
                insert_values: values,
            };
            let value = generated.eval(&input)?;
            set_path_value(&mut row, &reference.column, value.to_json());
        }

        Ok(row)
    }

    fn validate_generated_values(
        &self,
        values: &[Scalar],
        row: &JsonMap<String, Value>,
    ) -> Result<(), SourceGenError> {
        for (reference, given) in self.columns.iter().zip(values) {
            let Some(generated) = self
                .table
                .reference(&reference.column)
                .and_then(|r| r.generated.as_ref())
            else {
                continue;
            };
            let input = EvalInput {
                document: Some(row),
                insert_values: values,
            };
            let computed = generated.eval(&input)?;
            if *given != computed {
                return Err(SourceGenError::GeneratedMismatch {
                    column: reference.column.clone(),
                    given: format!("{:?}", given),
                    computed: format!("{:?}", computed),
                });
            }
        }
        Ok(())
    }
}

/// Builds update payloads from the current document and the assignments.
pub struct UpdateSourceGen<'a> {
    table: &'a TableInfo,
    update_columns: Vec<String>,
}

impl<'a> UpdateSourceGen<'a> {
    pub fn new(table: &'a TableInfo, update_columns: &[String]) -> Self {
        Self {
            table,
            update_columns: update_columns.to_vec(),
        }
    }

    /// Evaluate the assignments against the current document and emit the
    /// post-update payload. Unassigned columns keep their current value;
    /// generated columns are recomputed from the updated row.
    pub fn generate_source(
        &self,
        current: &Doc,
        assignments: &[Expr],
        insert_values: &[Scalar],
    ) -> Result<Bytes, SourceGenError> {
        if assignments.len() != self.update_columns.len() {
            return Err(SourceGenError::AssignmentCount {
                expected: self.update_columns.len(),
                got: assignments.len(),
            });
        }

        let original = parse_current(current)?;
        let mut updated = original.clone();

        // All assignments see the pre-update row.
        let input = EvalInput {
            document: Some(&original),
            insert_values,
        };
        for (column, assignment) in self.update_columns.iter().zip(assignments) {
            let value = assignment.eval(&input)?;
            self.check_not_null(column, &value)?;
            set_path_value(&mut updated, column, value.to_json());
        }

        for reference in self.table.columns() {
            let Some(generated) = &reference.generated else {
                continue;
            };
            let input = EvalInput {
                document: Some(&updated),
                insert_values,
            };
            let value = generated.eval(&input)?;
            self.check_not_null(&reference.column, &value)?;
            set_path_value(&mut updated, &reference.column, value.to_json());
        }

        check_row_constraints(self.table, &updated)?;

        Ok(Bytes::from(
            serde_json::to_vec(&Value::Object(updated)).expect("row is valid json"),
        ))
    }

    fn check_not_null(&self, column: &str, value: &Scalar) -> Result<(), SourceGenError> {
        if !value.is_null() {
            return Ok(());
        }
        let must_not_be_null = self
            .table
            .reference(column)
            .map(|reference| self.table.column_must_not_be_null(reference))
            .unwrap_or(false);
        if must_not_be_null {
            return Err(SourceGenError::NotNull {
                column: column.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_current(current: &Doc) -> Result<JsonMap<String, Value>, SourceGenError> {
    let source = current.source.as_ref().ok_or_else(|| SourceGenError::InvalidCurrentDocument {
        id: current.id.clone(),
    })?;
    match serde_json::from_slice::<Value>(source) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(SourceGenError::InvalidCurrentDocument {
            id: current.id.clone(),
        }),
    }
}

/// Evaluate every CHECK constraint on the row; only an explicit `false`
/// fails, per SQL semantics.
fn check_row_constraints(table: &TableInfo, row: &JsonMap<String, Value>) -> Result<(), SourceGenError> {
    for check in table.checks() {
        let input = EvalInput {
            document: Some(row),
            insert_values: &[],
        };
        if check.expression.eval(&input)? == Scalar::Bool(false) {
            return Err(SourceGenError::CheckFailed {
                name: check.name.clone(),
            });
        }
    }
    Ok(())
}
