//! Rolling update store.

use std::sync::Arc;

use chrono::Utc;

use armada_api::update::{UpdateInfo, UpdateProgress};
use armada_id::UpdateId;

use crate::driver::Driver;
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::retry::RetryPolicy;
use crate::schema::{tables, Value};

use super::{execute, from_blob, to_blob};

/// CRUD over `update_info` and `update_progress`.
#[derive(Clone)]
pub struct UpdateStore {
    driver: Arc<dyn Driver>,
    policy: RetryPolicy,
}

impl UpdateStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            policy: RetryPolicy::default(),
        }
    }

    /// Creates an update record (CAS).
    pub async fn create_update(&self, info: &UpdateInfo) -> Result<(), StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "update_create",
            Statement::insert(
                &tables::UPDATE_INFO,
                vec!["update_id", "job_id", "state", "info", "created_at"],
                vec![
                    Value::String(info.id.to_string()),
                    Value::String(info.job_id.to_string()),
                    Value::String(format!("{:?}", info.state).to_lowercase()),
                    Value::Bytes(to_blob(info)?),
                    Value::Time(Utc::now()),
                ],
                true,
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::AlreadyExists {
                table: "update_info",
                key: info.id.to_string(),
            });
        }
        Ok(())
    }

    /// Loads an update record.
    pub async fn get_update(&self, update_id: &UpdateId) -> Result<UpdateInfo, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "update_get",
            Statement::select(
                &tables::UPDATE_INFO,
                vec!["info"],
                vec![Condition {
                    column: "update_id",
                    value: Value::String(update_id.to_string()),
                }],
            ),
        )
        .await?;
        let row = result.rows.first().ok_or_else(|| StorageError::RowNotFound {
            table: "update_info",
            key: update_id.to_string(),
        })?;
        let blob = row
            .require("update_info", "info")?
            .as_bytes()
            .ok_or_else(|| StorageError::Internal("corrupt update info".into()))?;
        from_blob(blob)
    }

    /// Replaces an update record after a state change.
    pub async fn put_update(&self, info: &UpdateInfo) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "update_put",
            Statement::update(
                &tables::UPDATE_INFO,
                vec![
                    ("state", Value::String(format!("{:?}", info.state).to_lowercase())),
                    ("info", Value::Bytes(to_blob(info)?)),
                ],
                vec![Condition {
                    column: "update_id",
                    value: Value::String(info.id.to_string()),
                }],
                vec![],
            ),
        )
        .await?;
        Ok(())
    }

    /// Saves a progress snapshot.
    pub async fn put_progress(
        &self,
        update_id: &UpdateId,
        progress: &UpdateProgress,
    ) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "update_progress_put",
            Statement::insert(
                &tables::UPDATE_PROGRESS,
                vec!["update_id", "progress", "updated_at"],
                vec![
                    Value::String(update_id.to_string()),
                    Value::Bytes(to_blob(progress)?),
                    Value::Time(Utc::now()),
                ],
                false,
            ),
        )
        .await?;
        Ok(())
    }

    /// Loads the progress snapshot; a missing row reads as empty progress.
    pub async fn get_progress(
        &self,
        update_id: &UpdateId,
    ) -> Result<UpdateProgress, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "update_progress_get",
            Statement::select(
                &tables::UPDATE_PROGRESS,
                vec!["progress"],
                vec![Condition {
                    column: "update_id",
                    value: Value::String(update_id.to_string()),
                }],
            ),
        )
        .await?;
        match result.rows.first() {
            Some(row) => {
                let blob = row
                    .require("update_progress", "progress")?
                    .as_bytes()
                    .ok_or_else(|| StorageError::Internal("corrupt update progress".into()))?;
                from_blob(blob)
            }
            None => Ok(UpdateProgress::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use armada_api::update::UpdateState;
    use armada_id::JobId;

    #[tokio::test]
    async fn create_get_progress_round_trip() {
        let store = UpdateStore::new(Arc::new(InMemoryDriver::new()));
        let info = UpdateInfo {
            id: UpdateId::new(),
            job_id: JobId::new(),
            from_config_version: 1,
            to_config_version: 2,
            instances_added: vec![4, 5],
            instances_updated: vec![0, 1, 2, 3],
            instances_removed: vec![],
            state: UpdateState::Initialized,
            created_at: Utc::now(),
        };
        store.create_update(&info).await.unwrap();
        assert!(store.create_update(&info).await.is_err());

        let loaded = store.get_update(&info.id).await.unwrap();
        assert_eq!(loaded, info);

        assert_eq!(
            store.get_progress(&info.id).await.unwrap(),
            UpdateProgress::default()
        );
        let progress = UpdateProgress {
            instances_done: vec![0, 1],
            instances_failed: vec![],
            instances_current: vec![2],
        };
        store.put_progress(&info.id, &progress).await.unwrap();
        assert_eq!(store.get_progress(&info.id).await.unwrap(), progress);
    }
}
