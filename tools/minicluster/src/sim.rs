//! The simulated host manager.
//!
//! Hosts are fixed-capacity slots. Offers lease a host's free capacity;
//! launches consume it and emit `Starting`/`Running` status events onto the
//! shared stream, then `Succeeded` once the simulated run time elapses.
//! Kills complete immediately with `Killed`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use armada_api::clients::HostManagerClient;
use armada_api::events::{EventPayload, TaskStatusEvent};
use armada_api::sched::{HostFilter, HostOffer, LaunchablePod};
use armada_api::task::TaskState;
use armada_api::Error;
use armada_eventstream::Handler;
use armada_id::{AgentId, HostOfferId, PodId, TaskId};
use armada_scalar::Resources;

struct SimHost {
    hostname: String,
    agent_id: AgentId,
    available: Resources,
}

struct Lease {
    hostname: String,
    resources: Resources,
    expires_at: chrono::DateTime<Utc>,
}

struct RunningPod {
    task_id: TaskId,
    hostname: String,
    resources: Resources,
    timer: tokio::task::JoinHandle<()>,
}

struct SimState {
    hosts: Vec<SimHost>,
    leases: HashMap<HostOfferId, Lease>,
    pods: HashMap<PodId, RunningPod>,
}

/// A fake fleet that runs pods on a timer.
pub struct SimHostManager {
    state: Arc<Mutex<SimState>>,
    events: Arc<Handler>,
    run_time: Duration,
}

impl SimHostManager {
    /// A fleet of `count` identical hosts.
    pub fn new(
        count: usize,
        capacity: Resources,
        events: Arc<Handler>,
        run_time: Duration,
    ) -> Self {
        let hosts = (0..count)
            .map(|i| SimHost {
                hostname: format!("sim-host-{i}"),
                agent_id: AgentId::new(),
                available: capacity,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                hosts,
                leases: HashMap::new(),
                pods: HashMap::new(),
            })),
            events,
            run_time,
        }
    }

    /// Total capacity across the fleet, for sizing the root resource pool.
    pub fn total_capacity(&self) -> Resources {
        let state = self.lock();
        state
            .hosts
            .iter()
            .fold(Resources::ZERO, |acc, h| acc.add(&h.available))
    }

    fn emit(&self, task_id: TaskId, pod_id: PodId, state: TaskState, hostname: Option<String>) {
        let payload = EventPayload::TaskStatus(TaskStatusEvent {
            task_id,
            pod_id,
            state,
            message: String::new(),
            reason: String::new(),
            hostname,
            timestamp: Utc::now(),
        });
        if let Err(e) = self.events.add_event(payload) {
            warn!(task_id = %task_id, error = %e, "dropping simulated status event");
        }
    }

    /// Frees a finished pod's resources back to its host.
    fn release_pod(state: &mut SimState, pod_id: &PodId) -> Option<RunningPod> {
        let pod = state.pods.remove(pod_id)?;
        if let Some(host) = state.hosts.iter_mut().find(|h| h.hostname == pod.hostname) {
            host.available = host.available.add(&pod.resources);
        }
        Some(pod)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim host manager lock poisoned")
    }
}

#[async_trait]
impl HostManagerClient for SimHostManager {
    async fn acquire_host_offers(&self, filter: HostFilter) -> Result<Vec<HostOffer>, Error> {
        let mut state = self.lock();
        let mut offers = Vec::new();
        let max_hosts = if filter.max_hosts == 0 {
            usize::MAX
        } else {
            filter.max_hosts as usize
        };

        // leases that were never consumed come back on expiry
        let now = Utc::now();
        state.leases.retain(|_, lease| lease.expires_at > now);

        // one outstanding lease per host at a time
        let leased: Vec<String> = state.leases.values().map(|l| l.hostname.clone()).collect();
        let mut granted: Vec<(HostOfferId, Lease)> = Vec::new();
        for host in &state.hosts {
            if offers.len() >= max_hosts {
                break;
            }
            if leased.contains(&host.hostname) {
                continue;
            }
            if !filter.minimum.less_than_or_equal(&host.available) {
                continue;
            }
            let lease_id = HostOfferId::new();
            let expires_at = Utc::now() + chrono::Duration::seconds(10);
            offers.push(HostOffer {
                lease_id,
                hostname: host.hostname.clone(),
                agent_id: host.agent_id,
                resources: host.available,
                expires_at,
            });
            granted.push((
                lease_id,
                Lease {
                    hostname: host.hostname.clone(),
                    resources: host.available,
                    expires_at,
                },
            ));
        }
        for (lease_id, lease) in granted {
            state.leases.insert(lease_id, lease);
        }
        debug!(offers = offers.len(), "offers granted");
        Ok(offers)
    }

    async fn release_host_offers(&self, offers: Vec<HostOffer>) -> Result<(), Error> {
        let mut state = self.lock();
        for offer in offers {
            state.leases.remove(&offer.lease_id);
        }
        Ok(())
    }

    async fn launch_pods(
        &self,
        lease_id: HostOfferId,
        hostname: String,
        pods: Vec<LaunchablePod>,
    ) -> Result<(), Error> {
        if pods.is_empty() {
            return Err(Error::invalid("no pods to launch"));
        }

        let mut state = self.lock();
        let lease = state
            .leases
            .remove(&lease_id)
            .ok_or_else(|| Error::not_found(format!("unknown lease {lease_id}")))?;
        if lease.hostname != hostname {
            return Err(Error::invalid(format!(
                "lease {lease_id} is for {}, not {hostname}",
                lease.hostname
            )));
        }

        let needed = Resources::sum(pods.iter().map(|p| &p.config.resource));
        if !needed.less_than_or_equal(&lease.resources) {
            return Err(Error::resource_exhausted(format!(
                "pods need {needed} but lease holds {}",
                lease.resources
            )));
        }

        // consume what the pods use; the rest is offered again next round
        if let Some(host) = state.hosts.iter_mut().find(|h| h.hostname == hostname) {
            host.available = host.available.subtract(&needed);
        }

        for pod in &pods {
            let pod_id = pod.pod_id;
            let task_id = pod.task_id;
            let resources = pod.config.resource;

            let events = self.events.clone();
            let sim_state = self.state.clone();
            let run_time = self.run_time;
            let host_for_timer = hostname.clone();
            let timer = tokio::spawn(async move {
                // give the launch ack time to land before status flows
                tokio::time::sleep(Duration::from_millis(100)).await;
                emit_event(&events, task_id, pod_id, TaskState::Starting, &host_for_timer);
                tokio::time::sleep(Duration::from_millis(100)).await;
                emit_event(&events, task_id, pod_id, TaskState::Running, &host_for_timer);

                tokio::time::sleep(run_time).await;
                {
                    let mut state = sim_state.lock().expect("sim host manager lock poisoned");
                    SimHostManager::release_pod(&mut state, &pod_id);
                }
                emit_event(&events, task_id, pod_id, TaskState::Succeeded, &host_for_timer);
            });

            state.pods.insert(
                pod_id,
                RunningPod {
                    task_id,
                    hostname: hostname.clone(),
                    resources,
                    timer,
                },
            );
        }

        info!(hostname = %hostname, pods = pods.len(), "pods launched on simulated host");
        Ok(())
    }

    async fn kill_pods(&self, pod_ids: Vec<PodId>) -> Result<(), Error> {
        for pod_id in pod_ids {
            let killed = {
                let mut state = self.lock();
                if let Some(pod) = state.pods.get(&pod_id) {
                    pod.timer.abort();
                }
                Self::release_pod(&mut state, &pod_id)
            };
            match killed {
                Some(pod) => {
                    self.emit(
                        pod.task_id,
                        pod_id,
                        TaskState::Killed,
                        Some(pod.hostname.clone()),
                    );
                }
                None => debug!(pod_id = %pod_id, "kill for unknown pod ignored"),
            }
        }
        Ok(())
    }
}

fn emit_event(
    events: &Arc<Handler>,
    task_id: TaskId,
    pod_id: PodId,
    state: TaskState,
    hostname: &str,
) {
    let payload = EventPayload::TaskStatus(TaskStatusEvent {
        task_id,
        pod_id,
        state,
        message: String::new(),
        reason: String::new(),
        hostname: Some(hostname.to_string()),
        timestamp: Utc::now(),
    });
    if let Err(e) = events.add_event(payload) {
        warn!(task_id = %task_id, error = %e, "dropping simulated status event");
    }
}
