//! In-memory driver for tests and the minicluster.
//!
//! Tables are `BTreeMap`s keyed by the declared key columns in declaration
//! order. Conditional-write semantics match a wide-column store: the guard
//! is evaluated and the write applied under one lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::driver::{Driver, ExecuteResult, Row};
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::schema::{tables, Table, Value};

type RowCells = HashMap<&'static str, Value>;

#[derive(Default)]
struct TableData {
    rows: BTreeMap<Vec<Value>, RowCells>,
}

/// A fully in-memory [`Driver`].
pub struct InMemoryDriver {
    tables: Mutex<HashMap<&'static str, TableData>>,
}

impl InMemoryDriver {
    /// Creates a driver with every declared table empty.
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for table in tables::all() {
            map.insert(table.name, TableData::default());
        }
        Self {
            tables: Mutex::new(map),
        }
    }

    fn key_of(table: &Table, cells: &RowCells) -> Result<Vec<Value>, StorageError> {
        table
            .key_columns
            .iter()
            .map(|name| {
                cells.get(*name).cloned().ok_or_else(|| StorageError::Internal(format!(
                    "row in '{}' missing key column '{name}'",
                    table.name
                )))
            })
            .collect()
    }

    fn matches(cells: &RowCells, conditions: &[Condition]) -> bool {
        conditions
            .iter()
            .all(|c| cells.get(c.column) == Some(&c.value))
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn execute(&self, statement: Statement) -> Result<ExecuteResult, StorageError> {
        statement.validate()?;

        let mut guard = self
            .tables
            .lock()
            .map_err(|_| StorageError::Internal("driver lock poisoned".into()))?;
        let table = statement.table();
        let data = guard
            .get_mut(table.name)
            .ok_or_else(|| StorageError::Internal(format!("unknown table '{}'", table.name)))?;

        match statement {
            Statement::Insert {
                table,
                columns,
                values,
                if_not_exists,
            } => {
                let cells: RowCells = columns.into_iter().zip(values).collect();
                let key = Self::key_of(table, &cells)?;
                if if_not_exists && data.rows.contains_key(&key) {
                    return Ok(ExecuteResult::not_applied());
                }
                data.rows.insert(key, cells);
                Ok(ExecuteResult::applied())
            }
            Statement::Select {
                columns,
                conditions,
                ..
            } => {
                let rows = data
                    .rows
                    .values()
                    .filter(|cells| Self::matches(cells, &conditions))
                    .map(|cells| {
                        Row::from_cells(cells.iter().filter_map(|(name, value)| {
                            if columns.is_empty() || columns.contains(name) {
                                Some((*name, value.clone()))
                            } else {
                                None
                            }
                        }))
                    })
                    .collect();
                Ok(ExecuteResult::with_rows(rows))
            }
            Statement::Update {
                sets,
                conditions,
                if_eq,
                ..
            } => {
                let targets: Vec<Vec<Value>> = data
                    .rows
                    .iter()
                    .filter(|(_, cells)| Self::matches(cells, &conditions))
                    .map(|(key, _)| key.clone())
                    .collect();
                if targets.is_empty() {
                    return Ok(ExecuteResult::not_applied());
                }
                // The CAS guard must hold on every targeted row before any
                // row is touched.
                for key in &targets {
                    let cells = &data.rows[key];
                    if !Self::matches(cells, &if_eq) {
                        return Ok(ExecuteResult::not_applied());
                    }
                }
                for key in targets {
                    let cells = data.rows.get_mut(&key).ok_or_else(|| {
                        StorageError::Internal("row vanished during update".into())
                    })?;
                    for (name, value) in &sets {
                        cells.insert(name, value.clone());
                    }
                }
                Ok(ExecuteResult::applied())
            }
            Statement::Delete { conditions, .. } => {
                data.rows
                    .retain(|_, cells| !Self::matches(cells, &conditions));
                Ok(ExecuteResult::applied())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn insert_runtime(job_id: &str, revision: i64) -> Statement {
        Statement::insert(
            &tables::JOB_RUNTIME,
            vec!["job_id", "state", "goal_state", "revision", "runtime", "updated_at"],
            vec![
                Value::String(job_id.into()),
                Value::String("pending".into()),
                Value::String("succeeded".into()),
                Value::Int64(revision),
                Value::Bytes(vec![1, 2, 3]),
                Value::Time(Utc::now()),
            ],
            true,
        )
    }

    #[tokio::test]
    async fn insert_if_not_exists_is_cas() {
        let driver = InMemoryDriver::new();
        let first = driver.execute(insert_runtime("job_a", 0)).await.unwrap();
        assert!(first.applied);

        let second = driver.execute(insert_runtime("job_a", 0)).await.unwrap();
        assert!(!second.applied);
    }

    #[tokio::test]
    async fn conditional_update_checks_guard() {
        let driver = InMemoryDriver::new();
        driver.execute(insert_runtime("job_a", 0)).await.unwrap();

        let cas = |expected: i64, next: i64| {
            Statement::update(
                &tables::JOB_RUNTIME,
                vec![("revision", Value::Int64(next))],
                vec![Condition {
                    column: "job_id",
                    value: Value::String("job_a".into()),
                }],
                vec![Condition {
                    column: "revision",
                    value: Value::Int64(expected),
                }],
            )
        };

        assert!(driver.execute(cas(0, 1)).await.unwrap().applied);
        // stale guard loses
        assert!(!driver.execute(cas(0, 2)).await.unwrap().applied);
        assert!(driver.execute(cas(1, 2)).await.unwrap().applied);
    }

    #[tokio::test]
    async fn select_projects_and_filters() {
        let driver = InMemoryDriver::new();
        driver.execute(insert_runtime("job_a", 0)).await.unwrap();
        driver.execute(insert_runtime("job_b", 0)).await.unwrap();

        let result = driver
            .execute(Statement::select(
                &tables::JOB_RUNTIME,
                vec!["job_id"],
                vec![Condition {
                    column: "job_id",
                    value: Value::String("job_b".into()),
                }],
            ))
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.get("job_id").unwrap().as_str(), Some("job_b"));
        assert!(row.get("state").is_none());
    }

    #[tokio::test]
    async fn uuid_and_bool_round_trip() {
        let driver = InMemoryDriver::new();
        let secret_id = Uuid::new_v4();
        driver
            .execute(Statement::insert(
                &tables::SECRET_INFO,
                vec!["secret_id", "job_id", "path", "data", "valid", "created_at"],
                vec![
                    Value::Uuid(secret_id),
                    Value::String("job_a".into()),
                    Value::String("/etc/secret".into()),
                    Value::Bytes(b"hunter2".to_vec()),
                    Value::Bool(true),
                    Value::Time(Utc::now()),
                ],
                false,
            ))
            .await
            .unwrap();

        let result = driver
            .execute(Statement::select_all(&tables::SECRET_INFO))
            .await
            .unwrap();
        assert_eq!(result.rows[0].get("secret_id").unwrap().as_uuid(), Some(secret_id));
        assert_eq!(result.rows[0].get("valid").unwrap().as_bool(), Some(true));
    }
}
