//! The per-entity action scheduler.
//!
//! State is one mutex over `{key -> item}` plus a deadline-ordered queue; a
//! single dispatcher pops due entities and hands them to a bounded worker
//! pool. Per-entity mutual exclusion comes from the `in_flight` flag, not a
//! per-key lock, so memory stays bounded by the number of live entities.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use armada_api::Error;

const METRIC_ACTION_FATAL: &str = "armada_goalstate_action_fatal";
const METRIC_ACTION_RETRY: &str = "armada_goalstate_action_retry";
const METRIC_ACTION_TIMEOUT: &str = "armada_goalstate_action_timeout";

/// The result of one action invocation.
#[derive(Debug)]
pub enum ActionOutcome {
    /// Converged (for now); nothing further scheduled.
    Done,
    /// Ran fine, and the entity wants to run again after the delay.
    ReEnqueue(Duration),
    /// Transient failure; run again with backoff.
    Retry(Error),
    /// Permanent failure; log, count, drop.
    Fatal(Error),
}

/// Something the engine can drive toward its goal state.
///
/// An entity snapshot-resolves its own `{current, goal}` pair and executes
/// the matching action when invoked. Actions never mutate state directly;
/// they patch through the cache.
#[async_trait]
pub trait Entity: Send + Sync {
    /// Stable key; at most one action for a key is ever in flight.
    fn key(&self) -> String;

    /// Resolves and executes the action for the current snapshot.
    async fn act(&self) -> ActionOutcome;
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub action_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1000,
            action_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

struct Item {
    entity: Arc<dyn Entity>,
    /// Next scheduled run, if any.
    deadline: Option<Instant>,
    in_flight: bool,
    /// Deadline requested while the action was in flight.
    pending_deadline: Option<Instant>,
    attempts: u32,
    /// Deleted while in flight; the result is ignored.
    tombstone: bool,
}

#[derive(Default)]
struct State {
    items: HashMap<String, Item>,
    /// Min-heap of (deadline, key). Entries may be stale; the items map is
    /// authoritative.
    queue: BinaryHeap<Reverse<(Instant, String)>>,
}

/// The goal-state engine.
pub struct Engine {
    name: &'static str,
    config: EngineConfig,
    state: Mutex<State>,
    /// Wakes the dispatcher when an earlier deadline arrives.
    notify: Notify,
    workers: Arc<Semaphore>,
}

impl Engine {
    pub fn new(name: &'static str, config: EngineConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers));
        Self {
            name,
            config,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            workers,
        }
    }

    /// Schedules an entity to act at `deadline`.
    ///
    /// Idempotent under concurrent callers: if the entity is already queued
    /// with an earlier deadline, the earlier one is kept; a later queued
    /// deadline is overwritten. Enqueueing an in-flight entity schedules
    /// the follow-up run for after the action completes.
    pub fn enqueue(&self, entity: Arc<dyn Entity>, deadline: Instant) {
        let key = entity.key();
        let mut state = self.lock();
        let item = state.items.entry(key.clone()).or_insert_with(|| Item {
            entity,
            deadline: None,
            in_flight: false,
            pending_deadline: None,
            attempts: 0,
            tombstone: false,
        });
        item.tombstone = false;

        if item.in_flight {
            item.pending_deadline = Some(match item.pending_deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            });
            return;
        }

        let effective = match item.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        item.deadline = Some(effective);
        state.queue.push(Reverse((effective, key)));
        drop(state);
        self.notify.notify_one();
    }

    /// Removes an entity. Pending runs are dropped; an in-flight action is
    /// tombstoned and its result ignored.
    pub fn delete(&self, key: &str) {
        let mut state = self.lock();
        if let Some(item) = state.items.get_mut(key) {
            if item.in_flight {
                item.tombstone = true;
                item.pending_deadline = None;
            } else {
                state.items.remove(key);
            }
        }
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// The dispatcher loop. One per engine.
    #[instrument(skip(self, shutdown), fields(engine = self.name))]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.config.workers, "goal-state engine started");
        loop {
            let wait = {
                let mut state = self.lock();
                match self.pop_due(&mut state) {
                    Popped::Run(key, entity) => {
                        drop(state);
                        self.spawn_action(key, entity);
                        continue;
                    }
                    Popped::WaitUntil(deadline) => Some(deadline),
                    Popped::Idle => None,
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("goal-state engine stopping");
                        return;
                    }
                }
                _ = self.notify.notified() => {}
                _ = async {
                    match wait {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {}
            }
        }
    }

    fn spawn_action(self: &Arc<Self>, key: String, entity: Arc<dyn Entity>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let permit = engine
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");

            let outcome =
                match tokio::time::timeout(engine.config.action_timeout, entity.act()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        metrics::counter!(METRIC_ACTION_TIMEOUT, 1, "engine" => engine.name);
                        ActionOutcome::Retry(Error::deadline_exceeded(format!(
                            "action for {key} exceeded {:?}",
                            engine.config.action_timeout
                        )))
                    }
                };

            engine.complete(&key, entity, outcome);
            drop(permit);
        });
    }

    /// Applies an action outcome under the state lock.
    fn complete(&self, key: &str, entity: Arc<dyn Entity>, outcome: ActionOutcome) {
        let mut state = self.lock();
        let Some(item) = state.items.get_mut(key) else {
            return;
        };
        item.in_flight = false;

        if item.tombstone {
            debug!(engine = self.name, key, "dropping tombstoned entity");
            state.items.remove(key);
            return;
        }

        let next_deadline = match outcome {
            ActionOutcome::Done => {
                item.attempts = 0;
                item.pending_deadline.take()
            }
            ActionOutcome::ReEnqueue(delay) => {
                item.attempts = 0;
                let requested = Instant::now() + delay;
                Some(match item.pending_deadline.take() {
                    Some(pending) => pending.min(requested),
                    None => requested,
                })
            }
            ActionOutcome::Retry(err) => {
                item.attempts += 1;
                metrics::counter!(METRIC_ACTION_RETRY, 1, "engine" => self.name);
                let backoff = self.backoff(item.attempts);
                warn!(
                    engine = self.name,
                    key,
                    attempts = item.attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "action failed, retrying"
                );
                let requested = Instant::now() + backoff;
                Some(match item.pending_deadline.take() {
                    Some(pending) => pending.min(requested),
                    None => requested,
                })
            }
            ActionOutcome::Fatal(err) => {
                metrics::counter!(METRIC_ACTION_FATAL, 1, "engine" => self.name);
                error!(engine = self.name, key, error = %err, "action failed fatally");
                item.pending_deadline = None;
                None
            }
        };

        match next_deadline {
            Some(deadline) => {
                item.deadline = Some(deadline);
                item.entity = entity;
                state.queue.push(Reverse((deadline, key.to_string())));
                drop(state);
                self.notify.notify_one();
            }
            None => {
                state.items.remove(key);
            }
        }
    }

    /// Exponential backoff with ±20% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.config.backoff_base.as_millis() as u64;
        let raw = base.saturating_mul(1u64 << exp);
        let capped = raw.min(self.config.backoff_cap.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis(((capped as f64) * jitter) as u64)
    }

    fn pop_due(&self, state: &mut State) -> Popped {
        let now = Instant::now();
        while let Some(Reverse((deadline, key))) = state.queue.peek().cloned() {
            let Some(item) = state.items.get_mut(&key) else {
                state.queue.pop();
                continue;
            };
            // stale heap entry: the item was rescheduled
            if item.deadline != Some(deadline) || item.in_flight {
                state.queue.pop();
                continue;
            }
            if deadline > now {
                return Popped::WaitUntil(deadline);
            }
            state.queue.pop();
            item.in_flight = true;
            item.deadline = None;
            return Popped::Run(key, item.entity.clone());
        }
        Popped::Idle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("goal-state engine lock poisoned")
    }
}

enum Popped {
    Run(String, Arc<dyn Entity>),
    WaitUntil(Instant),
    Idle,
}
