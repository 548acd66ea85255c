//! Job config and runtime store.
//!
//! Runtime writes are compare-and-set on the `revision` column and keep two
//! side tables in step: `mv_jobs_by_state`, the state index recovery reads,
//! and `active_jobs`, the explicit active set kept as a diagnostic
//! cross-check.

use std::sync::Arc;

use chrono::Utc;

use armada_api::job::{JobConfig, JobRuntime, JobState};
use armada_id::JobId;

use crate::driver::Driver;
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::retry::RetryPolicy;
use crate::schema::{tables, Value};

use super::{execute, from_blob, to_blob};

/// CRUD over `job_config`, `job_runtime`, and their side tables.
#[derive(Clone)]
pub struct JobStore {
    driver: Arc<dyn Driver>,
    policy: RetryPolicy,
}

impl JobStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            policy: RetryPolicy::default(),
        }
    }

    /// Creates a job: config row, runtime row (CAS), state index entry, and
    /// active-set entry. A second create of the same job fails
    /// `AlreadyExists`.
    pub async fn create_job(
        &self,
        job_id: &JobId,
        config: &JobConfig,
        runtime: &JobRuntime,
    ) -> Result<(), StorageError> {
        self.put_job_config(job_id, config).await?;

        let result = execute(
            &self.driver,
            self.policy,
            "job_runtime_create",
            Statement::insert(
                &tables::JOB_RUNTIME,
                vec!["job_id", "state", "goal_state", "revision", "runtime", "updated_at"],
                vec![
                    Value::String(job_id.to_string()),
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
                table: "job_runtime",
                key: job_id.to_string(),
            });
        }

        self.put_state_index(job_id, None, runtime.state).await?;
        self.add_active_job(job_id).await?;
        Ok(())
    }

    /// Writes one versioned config row.
    pub async fn put_job_config(
        &self,
        job_id: &JobId,
        config: &JobConfig,
    ) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "job_config_put",
            Statement::insert(
                &tables::JOB_CONFIG,
                vec!["job_id", "config_version", "config", "created_at"],
                vec![
                    Value::String(job_id.to_string()),
                    Value::Int64(config.config_version as i64),
                    Value::Bytes(to_blob(config)?),
                    Value::Time(Utc::now()),
                ],
                false,
            ),
        )
        .await?;
        Ok(())
    }

    /// Loads one versioned config row.
    pub async fn get_job_config(
        &self,
        job_id: &JobId,
        config_version: u64,
    ) -> Result<JobConfig, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "job_config_get",
            Statement::select(
                &tables::JOB_CONFIG,
                vec!["config"],
                vec![
                    Condition {
                        column: "job_id",
                        value: Value::String(job_id.to_string()),
                    },
                    Condition {
                        column: "config_version",
                        value: Value::Int64(config_version as i64),
                    },
                ],
            ),
        )
        .await?;
        let row = result.rows.first().ok_or_else(|| StorageError::RowNotFound {
            table: "job_config",
            key: format!("{job_id}@{config_version}"),
        })?;
        let blob = row
            .require("job_config", "config")?
            .as_bytes()
            .ok_or_else(|| StorageError::Internal("corrupt job config".into()))?;
        from_blob(blob)
    }

    /// Loads the runtime row.
    pub async fn get_job_runtime(&self, job_id: &JobId) -> Result<JobRuntime, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "job_runtime_get",
            Statement::select(
                &tables::JOB_RUNTIME,
                vec!["runtime"],
                vec![Condition {
                    column: "job_id",
                    value: Value::String(job_id.to_string()),
                }],
            ),
        )
        .await?;
        let row = result.rows.first().ok_or_else(|| StorageError::RowNotFound {
            table: "job_runtime",
            key: job_id.to_string(),
        })?;
        let blob = row
            .require("job_runtime", "runtime")?
            .as_bytes()
            .ok_or_else(|| StorageError::Internal("corrupt job runtime".into()))?;
        from_blob(blob)
    }

    /// Conditionally replaces the runtime.
    ///
    /// `runtime.revision` must be the currently persisted revision; on
    /// success the returned runtime carries `revision + 1`. A stale revision
    /// fails with a write conflict and changes nothing.
    pub async fn update_job_runtime(
        &self,
        job_id: &JobId,
        runtime: &JobRuntime,
        prev_state: JobState,
    ) -> Result<JobRuntime, StorageError> {
        let mut next = runtime.clone();
        next.revision = runtime.revision + 1;

        let result = execute(
            &self.driver,
            self.policy,
            "job_runtime_update",
            Statement::update(
                &tables::JOB_RUNTIME,
                vec![
                    ("state", Value::String(next.state.to_string())),
                    ("goal_state", Value::String(next.goal_state.to_string())),
                    ("revision", Value::Int64(next.revision as i64)),
                    ("runtime", Value::Bytes(to_blob(&next)?)),
                    ("updated_at", Value::Time(Utc::now())),
                ],
                vec![Condition {
                    column: "job_id",
                    value: Value::String(job_id.to_string()),
                }],
                vec![Condition {
                    column: "revision",
                    value: Value::Int64(runtime.revision as i64),
                }],
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::WriteConflict {
                table: "job_runtime",
                key: job_id.to_string(),
            });
        }

        if prev_state != next.state {
            self.put_state_index(job_id, Some(prev_state), next.state)
                .await?;
        }
        if next.is_settled() {
            self.remove_active_job(job_id).await?;
        }
        Ok(next)
    }

    /// Job ids currently indexed under any of the given states.
    pub async fn get_jobs_by_states(
        &self,
        states: &[JobState],
    ) -> Result<Vec<JobId>, StorageError> {
        let mut job_ids = Vec::new();
        for state in states {
            let result = execute(
                &self.driver,
                self.policy,
                "jobs_by_state",
                Statement::select(
                    &tables::MV_JOBS_BY_STATE,
                    vec!["job_id"],
                    vec![Condition {
                        column: "state",
                        value: Value::String(state.to_string()),
                    }],
                ),
            )
            .await?;
            for row in result.rows {
                let id = row
                    .require("mv_jobs_by_state", "job_id")?
                    .as_str()
                    .and_then(|s| JobId::parse(s).ok())
                    .ok_or_else(|| StorageError::Internal("corrupt job_id in index".into()))?;
                job_ids.push(id);
            }
        }
        job_ids.sort();
        job_ids.dedup();
        Ok(job_ids)
    }

    /// The explicit active-job set.
    pub async fn get_active_jobs(&self) -> Result<Vec<JobId>, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "active_jobs_get",
            Statement::select_all(&tables::ACTIVE_JOBS),
        )
        .await?;
        result
            .rows
            .iter()
            .map(|row| {
                row.require("active_jobs", "job_id")?
                    .as_str()
                    .and_then(|s| JobId::parse(s).ok())
                    .ok_or_else(|| StorageError::Internal("corrupt active job id".into()))
            })
            .collect()
    }

    /// Adds a job to the explicit active set; idempotent.
    pub async fn add_active_job(&self, job_id: &JobId) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "active_jobs_add",
            Statement::insert(
                &tables::ACTIVE_JOBS,
                vec!["job_id", "added_at"],
                vec![Value::String(job_id.to_string()), Value::Time(Utc::now())],
                false,
            ),
        )
        .await?;
        Ok(())
    }

    /// Removes a job from the explicit active set.
    pub async fn remove_active_job(&self, job_id: &JobId) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "active_jobs_remove",
            Statement::delete(
                &tables::ACTIVE_JOBS,
                vec![Condition {
                    column: "job_id",
                    value: Value::String(job_id.to_string()),
                }],
            ),
        )
        .await?;
        Ok(())
    }

    /// Deletes the job's runtime, configs, and index entries.
    pub async fn delete_job(&self, job_id: &JobId, state: JobState) -> Result<(), StorageError> {
        let id_cond = Condition {
            column: "job_id",
            value: Value::String(job_id.to_string()),
        };
        execute(
            &self.driver,
            self.policy,
            "job_runtime_delete",
            Statement::delete(&tables::JOB_RUNTIME, vec![id_cond.clone()]),
        )
        .await?;
        execute(
            &self.driver,
            self.policy,
            "job_config_delete",
            Statement::delete(&tables::JOB_CONFIG, vec![id_cond.clone()]),
        )
        .await?;
        execute(
            &self.driver,
            self.policy,
            "job_state_index_delete",
            Statement::delete(
                &tables::MV_JOBS_BY_STATE,
                vec![
                    Condition {
                        column: "state",
                        value: Value::String(state.to_string()),
                    },
                    id_cond,
                ],
            ),
        )
        .await?;
        self.remove_active_job(job_id).await
    }

    async fn put_state_index(
        &self,
        job_id: &JobId,
        prev_state: Option<JobState>,
        state: JobState,
    ) -> Result<(), StorageError> {
        if let Some(prev) = prev_state {
            execute(
                &self.driver,
                self.policy,
                "job_state_index_move",
                Statement::delete(
                    &tables::MV_JOBS_BY_STATE,
                    vec![
                        Condition {
                            column: "state",
                            value: Value::String(prev.to_string()),
                        },
                        Condition {
                            column: "job_id",
                            value: Value::String(job_id.to_string()),
                        },
                    ],
                ),
            )
            .await?;
        }
        execute(
            &self.driver,
            self.policy,
            "job_state_index_put",
            Statement::insert(
                &tables::MV_JOBS_BY_STATE,
                vec!["state", "job_id", "updated_at"],
                vec![
                    Value::String(state.to_string()),
                    Value::String(job_id.to_string()),
                    Value::Time(Utc::now()),
                ],
                false,
            ),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use armada_api::job::{JobType, SlaConfig};
    use armada_api::task::TaskConfig;
    use armada_id::RespoolId;
    use armada_scalar::Resources;

    fn store() -> JobStore {
        JobStore::new(Arc::new(InMemoryDriver::new()))
    }

    fn job_config() -> JobConfig {
        JobConfig {
            name: "demo".into(),
            job_type: JobType::Batch,
            instance_count: 2,
            sla: SlaConfig::default(),
            respool_id: RespoolId::parse("batch").unwrap(),
            default_task: TaskConfig::with_resource("demo", Resources::new(1.0, 128.0, 0.0, 0.0)),
            config_version: 1,
        }
    }

    #[tokio::test]
    async fn create_then_load_round_trip() {
        let store = store();
        let job_id = JobId::new();
        let config = job_config();
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());

        store.create_job(&job_id, &config, &runtime).await.unwrap();

        let loaded = store.get_job_runtime(&job_id).await.unwrap();
        assert_eq!(loaded, runtime);
        let cfg = store.get_job_config(&job_id, 1).await.unwrap();
        assert_eq!(cfg, config);

        assert_eq!(store.get_active_jobs().await.unwrap(), vec![job_id]);
        assert_eq!(
            store
                .get_jobs_by_states(&[JobState::Initialized])
                .await
                .unwrap(),
            vec![job_id]
        );
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let store = store();
        let job_id = JobId::new();
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());
        store
            .create_job(&job_id, &job_config(), &runtime)
            .await
            .unwrap();
        let err = store
            .create_job(&job_id, &job_config(), &runtime)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = store();
        let job_id = JobId::new();
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());
        store
            .create_job(&job_id, &job_config(), &runtime)
            .await
            .unwrap();

        let mut next = runtime.clone();
        next.state = JobState::Running;
        let updated = store
            .update_job_runtime(&job_id, &next, JobState::Initialized)
            .await
            .unwrap();
        assert_eq!(updated.revision, runtime.revision + 1);

        // second writer with the original revision loses
        let err = store
            .update_job_runtime(&job_id, &next, JobState::Initialized)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteConflict { .. }));
    }

    #[tokio::test]
    async fn state_index_follows_updates() {
        let store = store();
        let job_id = JobId::new();
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());
        store
            .create_job(&job_id, &job_config(), &runtime)
            .await
            .unwrap();

        let mut next = runtime.clone();
        next.state = JobState::Running;
        store
            .update_job_runtime(&job_id, &next, JobState::Initialized)
            .await
            .unwrap();

        assert!(store
            .get_jobs_by_states(&[JobState::Initialized])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_jobs_by_states(&[JobState::Running])
                .await
                .unwrap(),
            vec![job_id]
        );
    }

    #[tokio::test]
    async fn settled_job_leaves_active_set() {
        let store = store();
        let job_id = JobId::new();
        let runtime = JobRuntime::new(JobType::Batch, 1, Utc::now());
        store
            .create_job(&job_id, &job_config(), &runtime)
            .await
            .unwrap();

        let mut next = runtime.clone();
        next.state = JobState::Succeeded;
        next.goal_state = JobState::Succeeded;
        store
            .update_job_runtime(&job_id, &next, JobState::Initialized)
            .await
            .unwrap();

        assert!(store.get_active_jobs().await.unwrap().is_empty());
    }
}
