//! Statement builders.
//!
//! Statements are plain values describing one CRUD operation against one
//! declared table. `validate` runs the schema check every driver relies on;
//! drivers may assume a validated statement.

use crate::error::StorageError;
use crate::schema::{Table, Value};

/// An equality condition on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: &'static str,
    pub value: Value,
}

/// A CRUD statement against one table.
#[derive(Debug, Clone)]
pub enum Statement {
    Insert {
        table: &'static Table,
        columns: Vec<&'static str>,
        values: Vec<Value>,
        /// Compare-and-set create: only applied when no row with this key
        /// exists yet.
        if_not_exists: bool,
    },
    Select {
        table: &'static Table,
        /// Empty selects every column.
        columns: Vec<&'static str>,
        conditions: Vec<Condition>,
    },
    Update {
        table: &'static Table,
        sets: Vec<(&'static str, Value)>,
        conditions: Vec<Condition>,
        /// Compare-and-set guard: only applied when every listed column
        /// currently holds the listed value.
        if_eq: Vec<Condition>,
    },
    Delete {
        table: &'static Table,
        conditions: Vec<Condition>,
    },
}

impl Statement {
    /// Builds an insert covering the given columns.
    pub fn insert(
        table: &'static Table,
        columns: Vec<&'static str>,
        values: Vec<Value>,
        if_not_exists: bool,
    ) -> Self {
        Statement::Insert {
            table,
            columns,
            values,
            if_not_exists,
        }
    }

    /// Builds a select; empty `columns` means all columns.
    pub fn select(
        table: &'static Table,
        columns: Vec<&'static str>,
        conditions: Vec<Condition>,
    ) -> Self {
        Statement::Select {
            table,
            columns,
            conditions,
        }
    }

    /// Builds a full-table select.
    pub fn select_all(table: &'static Table) -> Self {
        Statement::Select {
            table,
            columns: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Builds an update; `if_eq` adds a compare-and-set guard.
    pub fn update(
        table: &'static Table,
        sets: Vec<(&'static str, Value)>,
        conditions: Vec<Condition>,
        if_eq: Vec<Condition>,
    ) -> Self {
        Statement::Update {
            table,
            sets,
            conditions,
            if_eq,
        }
    }

    /// Builds a delete.
    pub fn delete(table: &'static Table, conditions: Vec<Condition>) -> Self {
        Statement::Delete { table, conditions }
    }

    /// The table this statement targets.
    pub fn table(&self) -> &'static Table {
        match self {
            Statement::Insert { table, .. }
            | Statement::Select { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Validates the statement against the declared schema.
    pub fn validate(&self) -> Result<(), StorageError> {
        match self {
            Statement::Insert {
                table,
                columns,
                values,
                ..
            } => {
                if columns.len() != values.len() {
                    return Err(StorageError::SchemaViolation {
                        table: table.name,
                        message: format!(
                            "{} columns but {} values",
                            columns.len(),
                            values.len()
                        ),
                    });
                }
                for (name, value) in columns.iter().zip(values) {
                    table.check_value(name, value)?;
                }
                for key in table.key_columns {
                    if !columns.contains(key) {
                        return Err(StorageError::SchemaViolation {
                            table: table.name,
                            message: format!("insert missing key column '{key}'"),
                        });
                    }
                }
                Ok(())
            }
            Statement::Select {
                table,
                columns,
                conditions,
            } => {
                for name in columns {
                    if table.column(name).is_none() {
                        return Err(StorageError::SchemaViolation {
                            table: table.name,
                            message: format!("unknown column '{name}'"),
                        });
                    }
                }
                check_conditions(table, conditions)
            }
            Statement::Update {
                table,
                sets,
                conditions,
                if_eq,
            } => {
                for (name, value) in sets {
                    table.check_value(name, value)?;
                    if table.is_key_column(name) {
                        return Err(StorageError::SchemaViolation {
                            table: table.name,
                            message: format!("cannot update key column '{name}'"),
                        });
                    }
                }
                check_conditions(table, conditions)?;
                check_conditions(table, if_eq)
            }
            Statement::Delete { table, conditions } => check_conditions(table, conditions),
        }
    }
}

fn check_conditions(table: &'static Table, conditions: &[Condition]) -> Result<(), StorageError> {
    for cond in conditions {
        table.check_value(cond.column, &cond.value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tables;

    #[test]
    fn insert_must_cover_key_columns() {
        let stmt = Statement::insert(
            &tables::JOB_RUNTIME,
            vec!["state"],
            vec![Value::String("running".into())],
            false,
        );
        assert!(stmt.validate().is_err());
    }

    #[test]
    fn update_rejects_key_column_set() {
        let stmt = Statement::update(
            &tables::JOB_RUNTIME,
            vec![("job_id", Value::String("other".into()))],
            vec![],
            vec![],
        );
        assert!(stmt.validate().is_err());
    }

    #[test]
    fn valid_conditional_update() {
        let stmt = Statement::update(
            &tables::JOB_RUNTIME,
            vec![("revision", Value::Int64(2))],
            vec![Condition {
                column: "job_id",
                value: Value::String("job_x".into()),
            }],
            vec![Condition {
                column: "revision",
                value: Value::Int64(1),
            }],
        );
        assert!(stmt.validate().is_ok());
    }
}
