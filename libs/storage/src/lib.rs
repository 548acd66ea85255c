//! # armada-storage
//!
//! The storage layer the orchestrator core programs against: a row-oriented
//! CRUD driver over named tables with conditional writes, plus typed stores
//! for each persisted entity.
//!
//! The driver is deliberately small — the backing engine (Cassandra-class
//! wide-column store, or the in-memory driver shipped here for tests and the
//! minicluster) is out of scope. What this crate owns is:
//!
//! - the compile-time table schema over a closed set of column kinds,
//! - the statement builders that are validated against that schema,
//! - the retry policy wrapped around every store call,
//! - the typed stores translating entities to rows and back.
//!
//! Conditional writes (`if_not_exists`, `if_eq`) are the concurrency
//! primitive: every runtime row carries a `revision` column and every
//! runtime write is a compare-and-set on it.

mod driver;
mod error;
mod memory;
mod query;
mod retry;
mod schema;
mod stores;

pub use driver::{Driver, ExecuteResult, Row};
pub use error::StorageError;
pub use memory::InMemoryDriver;
pub use query::{Condition, Statement};
pub use retry::{with_retries, RetryPolicy};
pub use schema::{tables, Column, ColumnKind, Table, Value};
pub use stores::{
    JobStore, PersistentVolume, RespoolStore, TaskStore, UpdateStore, VolumeState, VolumeStore,
    DEFAULT_INSTANCE_ID,
};
