//! # armada-resmgr
//!
//! The resource manager: a hierarchical resource-pool tree with admission
//! control, max-min fair entitlement calculation, and the in-process
//! service front-end the placement engine and job manager talk to.
//!
//! Ownership: the [`tree::Tree`] exclusively owns node state (config, quota,
//! allocation, demand queues). The [`tracker::Tracker`] owns the scheduling
//! view of active tasks. The [`service::ResourceManager`] composes both and
//! implements [`armada_api::clients::ResourceManagerClient`].

pub mod config;
pub mod entitlement;
pub mod error;
pub mod queue;
pub mod respool;
pub mod service;
pub mod tracker;
pub mod tree;

pub use config::ResmgrConfig;
pub use error::ResmgrError;
pub use service::ResourceManager;
pub use tree::Tree;
