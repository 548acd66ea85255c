//! # armada-jobmgr
//!
//! The job manager: the write-through job/task cache, the goal-state
//! engine that drives every entity toward its goal, the lifecycle façade
//! over the host manager, and leader-failover recovery.
//!
//! Control flow converges on the goal-state engine: status events, placement
//! hand-offs, and recovery all end in an `enqueue`, and the engine's actions
//! are the only code that moves runtime state (always through the cache,
//! never directly).

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod goalstate;
pub mod lifecycle;
pub mod lockstate;
pub mod placements;
pub mod ratelimit;
pub mod recovery;
pub mod status;

pub use config::JobmgrConfig;
pub use driver::JobManager;
pub use error::JobmgrError;
