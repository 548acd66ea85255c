//! # armada-minicluster
//!
//! A whole Armada control plane in one process: in-memory storage, the
//! resource manager, the placement engine, the job manager, and a simulated
//! host manager that completes launched pods after a configurable run time.
//!
//! Exists for demos and end-to-end tests; the binary submits sample jobs
//! and drives them to their goal states.

mod cluster;
mod sim;

pub use cluster::{Minicluster, MiniclusterConfig};
pub use sim::SimHostManager;
