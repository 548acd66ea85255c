//! Priority-FIFO gang queue.
//!
//! Ordering within one pool: priority descending, FIFO within a priority.
//! Gangs returned by placement re-enter at the head of their priority band,
//! ahead of gangs that never left the queue.

use std::collections::{BTreeMap, VecDeque};

use armada_api::sched::{Gang, TaskType};
use armada_scalar::Resources;

/// The demand queue of one leaf pool.
#[derive(Debug, Default)]
pub struct GangQueue {
    /// Priority band -> FIFO of gangs. Iterated highest band first.
    bands: BTreeMap<u32, VecDeque<Gang>>,
    len: usize,
}

impl GangQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued gangs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a gang at the tail of its priority band.
    pub fn enqueue(&mut self, gang: Gang) {
        self.bands.entry(gang.priority).or_default().push_back(gang);
        self.len += 1;
    }

    /// Re-inserts a returned gang at the head of its priority band.
    pub fn enqueue_at_head(&mut self, gang: Gang) {
        self.bands.entry(gang.priority).or_default().push_front(gang);
        self.len += 1;
    }

    /// The next gang in priority-FIFO order, optionally filtered by task
    /// type. A type filter skips over non-matching gangs without removing
    /// them.
    pub fn peek(&self, task_type: Option<TaskType>) -> Option<&Gang> {
        self.iter().find(|gang| match task_type {
            Some(t) => gang.task_type() == Some(t),
            None => true,
        })
    }

    /// Removes and returns the gang `peek` would have returned.
    pub fn dequeue(&mut self, task_type: Option<TaskType>) -> Option<Gang> {
        let mut target: Option<(u32, usize)> = None;
        'outer: for (&priority, band) in self.bands.iter().rev() {
            for (index, gang) in band.iter().enumerate() {
                let matches = match task_type {
                    Some(t) => gang.task_type() == Some(t),
                    None => true,
                };
                if matches {
                    target = Some((priority, index));
                    break 'outer;
                }
            }
        }

        let (priority, index) = target?;
        let band = self.bands.get_mut(&priority)?;
        let gang = band.remove(index)?;
        if band.is_empty() {
            self.bands.remove(&priority);
        }
        self.len -= 1;
        Some(gang)
    }

    /// Aggregate resource demand of all queued gangs.
    pub fn demand(&self) -> Resources {
        self.iter()
            .fold(Resources::ZERO, |acc, gang| acc.add(&gang.resources()))
    }

    /// Iterates gangs in priority-FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &Gang> {
        self.bands.iter().rev().flat_map(|(_, band)| band.iter())
    }
}
