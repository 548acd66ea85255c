//! The goal-state engine and its entities.
//!
//! [`engine::Engine`] is the generic per-entity action scheduler; the
//! entity modules wire it to jobs and tasks through the cache.

pub mod engine;
pub mod job_entity;
pub mod task_entity;

pub use engine::{ActionOutcome, Engine, EngineConfig, Entity};
pub use job_entity::JobEntity;
pub use task_entity::TaskEntity;
