//! Persistent volume store, backing sticky (stateful) placement.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use armada_id::{TaskId, VolumeId};

use crate::driver::Driver;
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::retry::RetryPolicy;
use crate::schema::{tables, Value};

use super::execute;

/// Lifecycle of a persistent volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Initialized,
    Created,
    Deleted,
}

impl VolumeState {
    fn as_str(&self) -> &'static str {
        match self {
            VolumeState::Initialized => "initialized",
            VolumeState::Created => "created",
            VolumeState::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(VolumeState::Initialized),
            "created" => Some(VolumeState::Created),
            "deleted" => Some(VolumeState::Deleted),
            _ => None,
        }
    }
}

/// One persistent volume bound to a task instance and a host.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentVolume {
    pub id: VolumeId,
    pub task_id: TaskId,
    pub hostname: String,
    pub size_mb: u64,
    pub state: VolumeState,
}

/// CRUD over `persistent_volume`.
#[derive(Clone)]
pub struct VolumeStore {
    driver: Arc<dyn Driver>,
    policy: RetryPolicy,
}

impl VolumeStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            policy: RetryPolicy::default(),
        }
    }

    /// Creates a volume record (CAS).
    pub async fn create_volume(&self, volume: &PersistentVolume) -> Result<(), StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "volume_create",
            Statement::insert(
                &tables::PERSISTENT_VOLUME,
                vec![
                    "volume_id",
                    "job_id",
                    "instance_id",
                    "hostname",
                    "size_mb",
                    "state",
                    "created_at",
                ],
                vec![
                    Value::String(volume.id.to_string()),
                    Value::String(volume.task_id.job_id().to_string()),
                    Value::Int(volume.task_id.instance_id() as i32),
                    Value::String(volume.hostname.clone()),
                    Value::Int64(volume.size_mb as i64),
                    Value::String(volume.state.as_str().into()),
                    Value::Time(Utc::now()),
                ],
                true,
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::AlreadyExists {
                table: "persistent_volume",
                key: volume.id.to_string(),
            });
        }
        Ok(())
    }

    /// Loads one volume.
    pub async fn get_volume(&self, id: &VolumeId) -> Result<PersistentVolume, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "volume_get",
            Statement::select(
                &tables::PERSISTENT_VOLUME,
                vec![],
                vec![Condition {
                    column: "volume_id",
                    value: Value::String(id.to_string()),
                }],
            ),
        )
        .await?;
        let row = result.rows.first().ok_or_else(|| StorageError::RowNotFound {
            table: "persistent_volume",
            key: id.to_string(),
        })?;

        let job_id = row
            .require("persistent_volume", "job_id")?
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::Internal("corrupt volume job_id".into()))?;
        let instance = row
            .require("persistent_volume", "instance_id")?
            .as_int()
            .ok_or_else(|| StorageError::Internal("corrupt volume instance_id".into()))?;
        let hostname = row
            .require("persistent_volume", "hostname")?
            .as_str()
            .ok_or_else(|| StorageError::Internal("corrupt volume hostname".into()))?
            .to_string();
        let size_mb = row
            .require("persistent_volume", "size_mb")?
            .as_int64()
            .ok_or_else(|| StorageError::Internal("corrupt volume size".into()))?;
        let state = row
            .require("persistent_volume", "state")?
            .as_str()
            .and_then(VolumeState::parse)
            .ok_or_else(|| StorageError::Internal("corrupt volume state".into()))?;

        Ok(PersistentVolume {
            id: *id,
            task_id: TaskId::new(job_id, instance as u32),
            hostname,
            size_mb: size_mb as u64,
            state,
        })
    }

    /// Updates a volume's lifecycle state.
    pub async fn update_volume_state(
        &self,
        id: &VolumeId,
        state: VolumeState,
    ) -> Result<(), StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "volume_update_state",
            Statement::update(
                &tables::PERSISTENT_VOLUME,
                vec![("state", Value::String(state.as_str().into()))],
                vec![Condition {
                    column: "volume_id",
                    value: Value::String(id.to_string()),
                }],
                vec![],
            ),
        )
        .await?;
        if !result.applied {
            return Err(StorageError::RowNotFound {
                table: "persistent_volume",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use armada_id::JobId;

    #[tokio::test]
    async fn volume_round_trip() {
        let store = VolumeStore::new(Arc::new(InMemoryDriver::new()));
        let volume = PersistentVolume {
            id: VolumeId::new(),
            task_id: TaskId::new(JobId::new(), 2),
            hostname: "host-7".into(),
            size_mb: 2048,
            state: VolumeState::Initialized,
        };
        store.create_volume(&volume).await.unwrap();

        let loaded = store.get_volume(&volume.id).await.unwrap();
        assert_eq!(loaded, volume);

        store
            .update_volume_state(&volume.id, VolumeState::Created)
            .await
            .unwrap();
        assert_eq!(
            store.get_volume(&volume.id).await.unwrap().state,
            VolumeState::Created
        );
    }
}
