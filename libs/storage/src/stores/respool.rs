//! Resource pool config store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use armada_api::respool::RespoolConfig;
use armada_id::RespoolId;

use crate::driver::Driver;
use crate::error::StorageError;
use crate::query::{Condition, Statement};
use crate::retry::RetryPolicy;
use crate::schema::{tables, Value};

use super::{execute, from_blob, to_blob};

/// CRUD over the `resource_pools` table.
#[derive(Clone)]
pub struct RespoolStore {
    driver: Arc<dyn Driver>,
    policy: RetryPolicy,
}

impl RespoolStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            policy: RetryPolicy::default(),
        }
    }

    /// Loads every stored pool config, keyed by id.
    pub async fn all(&self) -> Result<HashMap<RespoolId, RespoolConfig>, StorageError> {
        let result = execute(
            &self.driver,
            self.policy,
            "respool_all",
            Statement::select_all(&tables::RESOURCE_POOLS),
        )
        .await?;

        let mut configs = HashMap::with_capacity(result.rows.len());
        for row in result.rows {
            let id = row
                .require("resource_pools", "respool_id")?
                .as_str()
                .and_then(|s| RespoolId::parse(s).ok())
                .ok_or_else(|| StorageError::Internal("corrupt respool_id".into()))?;
            let blob = row
                .require("resource_pools", "config")?
                .as_bytes()
                .ok_or_else(|| StorageError::Internal("corrupt respool config".into()))?;
            configs.insert(id, from_blob(blob)?);
        }
        Ok(configs)
    }

    /// Creates or replaces one pool config.
    pub async fn upsert(
        &self,
        id: &RespoolId,
        config: &RespoolConfig,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        execute(
            &self.driver,
            self.policy,
            "respool_upsert",
            Statement::insert(
                &tables::RESOURCE_POOLS,
                vec!["respool_id", "config", "created_at", "updated_at"],
                vec![
                    Value::String(id.to_string()),
                    Value::Bytes(to_blob(config)?),
                    Value::Time(now),
                    Value::Time(now),
                ],
                false,
            ),
        )
        .await?;
        Ok(())
    }

    /// Deletes one pool config.
    pub async fn delete(&self, id: &RespoolId) -> Result<(), StorageError> {
        execute(
            &self.driver,
            self.policy,
            "respool_delete",
            Statement::delete(
                &tables::RESOURCE_POOLS,
                vec![Condition {
                    column: "respool_id",
                    value: Value::String(id.to_string()),
                }],
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
    use armada_api::respool::SchedulingPolicy;

    fn store() -> RespoolStore {
        RespoolStore::new(Arc::new(InMemoryDriver::new()))
    }

    fn config(name: &str) -> RespoolConfig {
        RespoolConfig {
            name: name.into(),
            parent: Some(RespoolId::root()),
            resources: Vec::new(),
            policy: SchedulingPolicy::PriorityFifo,
            controller_limit: 1.0,
        }
    }

    #[tokio::test]
    async fn upsert_and_load_round_trip() {
        let store = store();
        let id = RespoolId::parse("batch").unwrap();
        store.upsert(&id, &config("batch")).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&id].name, "batch");

        store.delete(&id).await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
    }
}
