//! # armada-api
//!
//! The Armada data model: jobs, tasks, updates, resource pool configuration,
//! the scheduling view (gangs, placements, host offers), event payloads, the
//! shared error taxonomy, and the client traits for external collaborators
//! (host manager, resource manager).
//!
//! This crate defines WHAT flows between components; the components
//! themselves live in the service crates.

pub mod clients;
pub mod errors;
pub mod events;
pub mod job;
pub mod respool;
pub mod sched;
pub mod task;
pub mod update;

pub use errors::{Error, ErrorKind};
