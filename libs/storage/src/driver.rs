//! The row-oriented CRUD driver interface.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::query::Statement;
use crate::schema::Value;

/// One row returned by a select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: BTreeMap<&'static str, Value>,
}

impl Row {
    /// Builds a row from column/value pairs.
    pub fn from_cells(cells: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self {
            cells: cells.into_iter().collect(),
        }
    }

    /// Returns one cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    /// Returns one cell, erroring with the table context when absent.
    pub fn require(&self, table: &'static str, column: &str) -> Result<&Value, StorageError> {
        self.get(column).ok_or_else(|| StorageError::Internal(format!(
            "row from '{table}' missing column '{column}'"
        )))
    }

    /// Iterates all cells.
    pub fn cells(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }
}

/// The outcome of one statement.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    /// For conditional writes: whether the write took effect. Unconditional
    /// statements always report `true`.
    pub applied: bool,
    /// For selects: the matching rows.
    pub rows: Vec<Row>,
}

impl ExecuteResult {
    /// An applied result with no rows.
    pub fn applied() -> Self {
        Self {
            applied: true,
            rows: Vec::new(),
        }
    }

    /// A rejected conditional write.
    pub fn not_applied() -> Self {
        Self {
            applied: false,
            rows: Vec::new(),
        }
    }

    /// A select result.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            applied: true,
            rows,
        }
    }
}

/// A storage backend executing validated statements.
///
/// Implementations must honor conditional-write semantics: an
/// `if_not_exists` insert over an existing key and an `if_eq` update whose
/// guard does not match both return `applied == false` without touching the
/// row.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, statement: Statement) -> Result<ExecuteResult, StorageError>;
}
