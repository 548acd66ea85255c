//! Task config and runtime store.

use std::sync::Arc;

use chrono::Utc;

use armada_api::task::{TaskConfig, TaskRuntime};
use armada_id::{JobId, TaskId};

use crate::driver::{Driver, Row};
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::retry::RetryPolicy;
use crate::schema::{tables, Value};

use super::{execute, from_blob, to_blob};

/// Instance id under which a job's default task config is stored.
pub const DEFAULT_INSTANCE_ID: i32 = -1;

/// CRUD over `task_config` and `task_runtime`.
#[derive(Clone)]
pub struct TaskStore {
    driver: Arc<dyn Driver>,
    policy: RetryPolicy,
}

impl TaskStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            policy: RetryPolicy::default(),
        }
    }

    /// Writes a task config row. `instance_id == None` stores the job-level
    /// default used by instances without an override.
    pub async fn put_task_config(
        &self,
        job_id: &JobId,
        instance_id: Option<u32>,
        config_version: u64,
        config: &TaskConfig,
    ) -> Result<(), StorageError> {
        let instance = instance_id.map_or(DEFAULT_INSTANCE_ID, |i| i as i32);
        execute(
            &self.driver,
            self.policy,
            "task_config_put",
            Statement::insert(
                &tables::TASK_CONFIG,
                vec!["job_id", "instance_id", "config_version", "config", "created_at"],
                vec![
                    Value::String(job_id.to_string()),
                    Value::Int(instance),
                    Value::Int64(config_version as i64),
                    Value::Bytes(to_blob(config)?),
                    Value::Time(Utc::now()),
                ],
                false,
            ),
        )
        .await?;
        Ok(())
    }

    /// Loads the config for one instance, falling back to the job default.
    pub async fn get_task_config(
        &self,
        task_id: &TaskId,
        config_version: u64,
    ) -> Result<TaskConfig, StorageError> {
        for instance in [task_id.instance_id() as i32, DEFAULT_INSTANCE_ID] {
            let result = execute(
                &self.driver,
                self.policy,
                "task_config_get",
                Statement::select(
                    &tables::TASK_CONFIG,
                    vec!["config"],
                    vec![
                        Condition {
                            column: "job_id",
                            value: Value::String(task_id.job_id().to_string()),
                        },
                        Condition {
                            column: "instance_id",
                            value: Value::Int(instance),
                        },
                        Condition {
                            column: "config_version",
                            value: Value::Int64(config_version as i64),
                        },
                    ],
                ),
            )
            .await?;
            if let Some(row) = result.rows.first() {
                let blob = row
                    .require("task_config", "config")?
                    .as_bytes()
                    .ok_or_else(|| StorageError::Internal("corrupt task config".into()))?;
                return from_blob(blob);
            }
        }
        Err(StorageError::RowNotFound {
            table: "task_config",
            key: format!("{task_id}@{config_version}"),
        })
    }

    /// Creates the runtime row for one instance (CAS).
    pub async fn create_task_runtime(
        &self,
        task_id: &TaskId,
        runtime: &TaskRuntime,
    ) -> Result<(), StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "task_runtime_create",
            Statement::insert(
                &tables::TASK_RUNTIME,
                vec![
                    "job_id",
                    "instance_id",
                    "state",
                    "goal_state",
                    "revision",
                    "runtime",
                    "updated_at",
                ],
                vec![
                    Value::String(task_id.job_id().to_string()),
                    Value::Int(task_id.instance_id() as i32),
                    Value::String(runtime.state.to_string()),
                    Value::String(runtime.goal_state.to_string()),
                    Value::Int64(runtime.revision as i64),
                    Value::Bytes(to_blob(runtime)?),
                    Value::Time(Utc::now()),
                ],
                true,
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::AlreadyExists {
                table: "task_runtime",
                key: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Loads the runtime for one instance.
    pub async fn get_task_runtime(&self, task_id: &TaskId) -> Result<TaskRuntime, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "task_runtime_get",
            Statement::select(
                &tables::TASK_RUNTIME,
                vec!["runtime"],
                vec![
                    Condition {
                        column: "job_id",
                        value: Value::String(task_id.job_id().to_string()),
                    },
                    Condition {
                        column: "instance_id",
                        value: Value::Int(task_id.instance_id() as i32),
                    },
                ],
            ),
        )
        .await?;
        let row = result.rows.first().ok_or_else(|| StorageError::RowNotFound {
            table: "task_runtime",
            key: task_id.to_string(),
        })?;
        Self::runtime_from_row(row)
    }

    /// Loads runtimes for instances in `[from, to)`, in instance order.
    pub async fn get_task_runtimes_in_range(
        &self,
        job_id: &JobId,
        from: u32,
        to: u32,
    ) -> Result<Vec<(u32, TaskRuntime)>, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "task_runtime_range",
            Statement::select(
                &tables::TASK_RUNTIME,
                vec!["instance_id", "runtime"],
                vec![Condition {
                    column: "job_id",
                    value: Value::String(job_id.to_string()),
                }],
            ),
        )
        .await?;

        let mut runtimes = Vec::new();
        for row in &result.rows {
            let instance = row
                .require("task_runtime", "instance_id")?
                .as_int()
                .ok_or_else(|| StorageError::Internal("corrupt instance_id".into()))?;
            if instance < 0 {
                continue;
            }
            let instance = instance as u32;
            if instance >= from && instance < to {
                runtimes.push((instance, Self::runtime_from_row(row)?));
            }
        }
        runtimes.sort_by_key(|(i, _)| *i);
        Ok(runtimes)
    }

    /// Conditionally replaces the runtime of one instance.
    ///
    /// `runtime.revision` must be the currently persisted revision; the
    /// returned runtime carries `revision + 1`. A stale revision fails with
    /// a write conflict and changes nothing.
    pub async fn update_task_runtime(
        &self,
        task_id: &TaskId,
        runtime: &TaskRuntime,
    ) -> Result<TaskRuntime, StorageError> {
        let mut next = runtime.clone();
        next.revision = runtime.revision + 1;

        let result = execute(
            &self.driver,
            self.policy,
            "task_runtime_update",
            Statement::update(
                &tables::TASK_RUNTIME,
                vec![
                    ("state", Value::String(next.state.to_string())),
                    ("goal_state", Value::String(next.goal_state.to_string())),
                    ("revision", Value::Int64(next.revision as i64)),
                    ("runtime", Value::Bytes(to_blob(&next)?)),
                    ("updated_at", Value::Time(Utc::now())),
                ],
                vec![
                    Condition {
                        column: "job_id",
                        value: Value::String(task_id.job_id().to_string()),
                    },
                    Condition {
                        column: "instance_id",
                        value: Value::Int(task_id.instance_id() as i32),
                    },
                ],
                vec![Condition {
                    column: "revision",
                    value: Value::Int64(runtime.revision as i64),
                }],
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::WriteConflict {
                table: "task_runtime",
                key: task_id.to_string(),
            });
        }
        Ok(next)
    }

    /// Deletes all task rows of one job.
    pub async fn delete_job_tasks(&self, job_id: &JobId) -> Result<(), StorageError> {
        let cond = Condition {
            column: "job_id",
            value: Value::String(job_id.to_string()),
        };
        execute(
            &self.driver,
            self.policy,
            "task_runtime_delete",
            Statement::delete(&tables::TASK_RUNTIME, vec![cond.clone()]),
        )
        .await?;
        execute(
            &self.driver,
            self.policy,
            "task_config_delete",
            Statement::delete(&tables::TASK_CONFIG, vec![cond]),
        )
        .await?;
        Ok(())
    }

    fn runtime_from_row(row: &Row) -> Result<TaskRuntime, StorageError> {
        let blob = row
            .require("task_runtime", "runtime")?
            .as_bytes()
            .ok_or_else(|| StorageError::Internal("corrupt task runtime".into()))?;
        from_blob(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use armada_api::task::TaskState;
    use armada_scalar::Resources;

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(InMemoryDriver::new()))
    }

    #[tokio::test]
    async fn runtime_create_get_update() {
        let store = store();
        let task_id = TaskId::new(JobId::new(), 0);
        let runtime = TaskRuntime::new(TaskState::Succeeded, 1);

        store.create_task_runtime(&task_id, &runtime).await.unwrap();
        let loaded = store.get_task_runtime(&task_id).await.unwrap();
        assert_eq!(loaded, runtime);

        let mut next = loaded.clone();
        next.state = TaskState::Pending;
        let updated = store.update_task_runtime(&task_id, &next).await.unwrap();
        assert_eq!(updated.revision, runtime.revision + 1);

        // stale writer loses
        let err = store.update_task_runtime(&task_id, &next).await.unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
    }

    #[tokio::test]
    async fn config_falls_back_to_default_instance() {
        let store = store();
        let job_id = JobId::new();
        let default_cfg = TaskConfig::with_resource("w", Resources::new(1.0, 64.0, 0.0, 0.0));
        let mut override_cfg = default_cfg.clone();
        override_cfg.resource.cpu = 4.0;

        store
            .put_task_config(&job_id, None, 1, &default_cfg)
            .await
            .unwrap();
        store
            .put_task_config(&job_id, Some(3), 1, &override_cfg)
            .await
            .unwrap();

        let got_default = store
            .get_task_config(&TaskId::new(job_id, 0), 1)
            .await
            .unwrap();
        assert_eq!(got_default.resource.cpu, 1.0);

        let got_override = store
            .get_task_config(&TaskId::new(job_id, 3), 1)
            .await
            .unwrap();
        assert_eq!(got_override.resource.cpu, 4.0);
    }

    #[tokio::test]
    async fn range_load_is_bounded_and_ordered() {
        let store = store();
        let job_id = JobId::new();
        for i in 0..5u32 {
            store
                .create_task_runtime(
                    &TaskId::new(job_id, i),
                    &TaskRuntime::new(TaskState::Succeeded, 1),
                )
                .await
                .unwrap();
        }

        let range = store
            .get_task_runtimes_in_range(&job_id, 1, 4)
            .await
            .unwrap();
        let instances: Vec<u32> = range.iter().map(|(i, _)| *i).collect();
        assert_eq!(instances, vec![1, 2, 3]);
    }
}
