//! Compile-time table schema.
//!
//! Every persisted entity declares its columns here over a closed set of
//! column kinds. Statements are validated against these declarations before
//! they reach a driver; a value whose kind does not match its column is a
//! hard error, never silently skipped.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;

/// The closed set of column kinds a driver must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    String,
    Int,
    Int64,
    Bool,
    Bytes,
    Time,
    Uuid,
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    String(String),
    Int(i32),
    Int64(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    /// The kind this value inhabits.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::String(_) => ColumnKind::String,
            Value::Int(_) => ColumnKind::Int,
            Value::Int64(_) => ColumnKind::Int64,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Bytes(_) => ColumnKind::Bytes,
            Value::Time(_) => ColumnKind::Time,
            Value::Uuid(_) => ColumnKind::Uuid,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

/// One column declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

/// One table declaration. `key_columns` are a prefix-free subset of
/// `columns` and identify a row; their declared order is the row key order.
#[derive(Debug, Clone, Copy)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub key_columns: &'static [&'static str],
}

impl Table {
    /// Looks up a column declaration by name.
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True if the named column is part of the row key.
    pub fn is_key_column(&self, name: &str) -> bool {
        self.key_columns.contains(&name)
    }

    /// Validates that a value fits the named column.
    pub fn check_value(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let Some(column) = self.column(name) else {
            return Err(StorageError::SchemaViolation {
                table: self.name,
                message: format!("unknown column '{name}'"),
            });
        };
        if column.kind != value.kind() {
            return Err(StorageError::SchemaViolation {
                table: self.name,
                message: format!(
                    "column '{}' is {:?}, got {:?}",
                    name,
                    column.kind,
                    value.kind()
                ),
            });
        }
        Ok(())
    }
}

/// The persisted state layout.
pub mod tables {
    use super::*;

    pub static RESOURCE_POOLS: Table = Table {
        name: "resource_pools",
        columns: &[
            col("respool_id", ColumnKind::String),
            col("config", ColumnKind::Bytes),
            col("created_at", ColumnKind::Time),
            col("updated_at", ColumnKind::Time),
        ],
        key_columns: &["respool_id"],
    };

    pub static JOB_CONFIG: Table = Table {
        name: "job_config",
        columns: &[
            col("job_id", ColumnKind::String),
            col("config_version", ColumnKind::Int64),
            col("config", ColumnKind::Bytes),
            col("created_at", ColumnKind::Time),
        ],
        key_columns: &["job_id", "config_version"],
    };

    pub static JOB_RUNTIME: Table = Table {
        name: "job_runtime",
        columns: &[
            col("job_id", ColumnKind::String),
            col("state", ColumnKind::String),
            col("goal_state", ColumnKind::String),
            col("revision", ColumnKind::Int64),
            col("runtime", ColumnKind::Bytes),
            col("updated_at", ColumnKind::Time),
        ],
        key_columns: &["job_id"],
    };

    pub static TASK_CONFIG: Table = Table {
        name: "task_config",
        columns: &[
            col("job_id", ColumnKind::String),
            col("instance_id", ColumnKind::Int),
            col("config_version", ColumnKind::Int64),
            col("config", ColumnKind::Bytes),
            col("created_at", ColumnKind::Time),
        ],
        key_columns: &["job_id", "instance_id", "config_version"],
    };

    pub static TASK_RUNTIME: Table = Table {
        name: "task_runtime",
        columns: &[
            col("job_id", ColumnKind::String),
            col("instance_id", ColumnKind::Int),
            col("state", ColumnKind::String),
            col("goal_state", ColumnKind::String),
            col("revision", ColumnKind::Int64),
            col("runtime", ColumnKind::Bytes),
            col("updated_at", ColumnKind::Time),
        ],
        key_columns: &["job_id", "instance_id"],
    };

    pub static UPDATE_INFO: Table = Table {
        name: "update_info",
        columns: &[
            col("update_id", ColumnKind::String),
            col("job_id", ColumnKind::String),
            col("state", ColumnKind::String),
            col("info", ColumnKind::Bytes),
            col("created_at", ColumnKind::Time),
        ],
        key_columns: &["update_id"],
    };

    pub static UPDATE_PROGRESS: Table = Table {
        name: "update_progress",
        columns: &[
            col("update_id", ColumnKind::String),
            col("progress", ColumnKind::Bytes),
            col("updated_at", ColumnKind::Time),
        ],
        key_columns: &["update_id"],
    };

    pub static PERSISTENT_VOLUME: Table = Table {
        name: "persistent_volume",
        columns: &[
            col("volume_id", ColumnKind::String),
            col("job_id", ColumnKind::String),
            col("instance_id", ColumnKind::Int),
            col("hostname", ColumnKind::String),
            col("size_mb", ColumnKind::Int64),
            col("state", ColumnKind::String),
            col("created_at", ColumnKind::Time),
        ],
        key_columns: &["volume_id"],
    };

    pub static SECRET_INFO: Table = Table {
        name: "secret_info",
        columns: &[
            col("secret_id", ColumnKind::Uuid),
            col("job_id", ColumnKind::String),
            col("path", ColumnKind::String),
            col("data", ColumnKind::Bytes),
            col("valid", ColumnKind::Bool),
            col("created_at", ColumnKind::Time),
        ],
        key_columns: &["secret_id"],
    };

    pub static FRAMEWORKS: Table = Table {
        name: "frameworks",
        columns: &[
            col("framework_name", ColumnKind::String),
            col("framework_id", ColumnKind::Uuid),
            col("stream_id", ColumnKind::String),
            col("update_host", ColumnKind::String),
            col("update_time", ColumnKind::Time),
        ],
        key_columns: &["framework_name"],
    };

    /// Materialized index of jobs by runtime state, maintained alongside
    /// `job_runtime` writes. Authoritative for recovery.
    pub static MV_JOBS_BY_STATE: Table = Table {
        name: "mv_jobs_by_state",
        columns: &[
            col("state", ColumnKind::String),
            col("job_id", ColumnKind::String),
            col("updated_at", ColumnKind::Time),
        ],
        key_columns: &["state", "job_id"],
    };

    /// Explicit active-job set, diagnostic cross-check for the materialized
    /// index.
    pub static ACTIVE_JOBS: Table = Table {
        name: "active_jobs",
        columns: &[
            col("job_id", ColumnKind::String),
            col("added_at", ColumnKind::Time),
        ],
        key_columns: &["job_id"],
    };

    /// Every declared table, for driver bootstrap.
    pub fn all() -> [&'static Table; 12] {
        [
            &RESOURCE_POOLS,
            &JOB_CONFIG,
            &JOB_RUNTIME,
            &TASK_CONFIG,
            &TASK_RUNTIME,
            &UPDATE_INFO,
            &UPDATE_PROGRESS,
            &PERSISTENT_VOLUME,
            &SECRET_INFO,
            &FRAMEWORKS,
            &MV_JOBS_BY_STATE,
            &ACTIVE_JOBS,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mismatch_is_a_hard_error() {
        let err = tables::JOB_RUNTIME
            .check_value("revision", &Value::String("7".into()))
            .unwrap_err();
        assert!(matches!(err, StorageError::SchemaViolation { .. }));
    }

    #[test]
    fn unknown_column_is_a_hard_error() {
        let err = tables::JOB_RUNTIME
            .check_value("no_such_column", &Value::Bool(true))
            .unwrap_err();
        assert!(matches!(err, StorageError::SchemaViolation { .. }));
    }

    #[test]
    fn key_columns_are_declared_columns() {
        for table in tables::all() {
            for key in table.key_columns {
                assert!(
                    table.column(key).is_some(),
                    "table {} key column {} missing from columns",
                    table.name,
                    key
                );
            }
        }
    }
}
