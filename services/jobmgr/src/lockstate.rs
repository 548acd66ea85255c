//! Process-level operation locks.
//!
//! An explicit dependency injected into the lifecycle manager so operators
//! can drain kill traffic without touching the callers.

use std::sync::atomic::{AtomicBool, Ordering};

/// Toggleable lock over kill operations.
#[derive(Debug, Default)]
pub struct LockState {
    kill_locked: AtomicBool,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks kill operations until cleared.
    pub fn set_kill_lock(&self) {
        self.kill_locked.store(true, Ordering::SeqCst);
    }

    /// Re-enables kill operations.
    pub fn clear_kill_lock(&self) {
        self.kill_locked.store(false, Ordering::SeqCst);
    }

    /// True while kills are drained.
    pub fn has_kill_lock(&self) -> bool {
        self.kill_locked.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles() {
        let lock = LockState::new();
        assert!(!lock.has_kill_lock());
        lock.set_kill_lock();
        assert!(lock.has_kill_lock());
        lock.clear_kill_lock();
        assert!(!lock.has_kill_lock());
    }
}
