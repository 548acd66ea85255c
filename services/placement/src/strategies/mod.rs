//! Placement strategies.
//!
//! A strategy fills each assignment's task→offer choices for one matching
//! round. Strategies are values registered by task-type key; the engine
//! dispatches through the [`Strategy`] trait.

mod batch;
mod service;
mod stateful;

pub use batch::BatchStrategy;
pub use service::ServiceStrategy;
pub use stateful::StatefulStrategy;

use std::collections::HashMap;

use armada_api::sched::TaskType;

use crate::models::{Assignment, OfferSlot};

/// Matches gangs against host offers.
pub trait Strategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Fills `assignment.chosen` for as many tasks as possible against the
    /// offered slots, claiming slot capacity as it goes. Partial choices
    /// are allowed; the engine resets gangs that do not fully place.
    fn place(&self, assignment: &mut Assignment, offers: &mut [OfferSlot]);
}

/// The default strategy registry: one strategy per task type.
pub fn default_strategies() -> HashMap<TaskType, Box<dyn Strategy>> {
    let mut strategies: HashMap<TaskType, Box<dyn Strategy>> = HashMap::new();
    strategies.insert(TaskType::Batch, Box::new(BatchStrategy));
    strategies.insert(TaskType::Service, Box::new(ServiceStrategy));
    strategies.insert(TaskType::Stateful, Box::new(StatefulStrategy));
    strategies
}
