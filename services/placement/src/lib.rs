//! # armada-placement
//!
//! The placement engine: dequeues admitted gangs from the resource manager,
//! acquires host offers, matches gangs to hosts through per-task-type
//! strategies, and commits the resulting placements.
//!
//! One engine loop runs per task type; loops are independent and honor the
//! shared shutdown signal.

pub mod config;
pub mod engine;
pub mod hosts;
pub mod models;
pub mod strategies;
pub mod tasks;

pub use config::PlacementConfig;
pub use engine::Engine;
