//! Typed stores translating entities to rows and back.
//!
//! Every store holds the driver plus the retry policy and keeps its table's
//! layout knowledge to itself. Config and runtime records travel as JSON
//! blobs in `Bytes` columns; the typed columns beside them are indexes and
//! CAS guards.

mod job;
mod respool;
mod task;
mod update;
mod volume;

pub use job::JobStore;
pub use respool::RespoolStore;
pub use task::{TaskStore, DEFAULT_INSTANCE_ID};
pub use update::UpdateStore;
pub use volume::{PersistentVolume, VolumeState, VolumeStore};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::driver::{Driver, ExecuteResult};
use crate::error::StorageError;
use crate::query::Statement;
use crate::retry::{with_retries, RetryPolicy};

pub(crate) async fn execute(
    driver: &Arc<dyn Driver>,
    policy: RetryPolicy,
    op_name: &'static str,
    statement: Statement,
) -> Result<ExecuteResult, StorageError> {
    with_retries(policy, op_name, || driver.execute(statement.clone())).await
}

pub(crate) fn to_blob<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn from_blob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}
