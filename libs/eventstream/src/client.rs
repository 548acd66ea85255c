//! The event stream consumer loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::EventStreamError;
use crate::handler::{Event, Handler};

/// Processes events pulled off the stream, in offset order.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Handles one event. An error stops watermark advancement so the event
    /// is redelivered on the next pull.
    async fn process(&self, event: Event) -> Result<(), armada_api::Error>;
}

/// Pull-loop configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_millis(500),
        }
    }
}

/// A registered consumer pulling events in order and advancing its purge
/// watermark past processed events.
pub struct Client<P: EventProcessor> {
    name: &'static str,
    handler: Arc<Handler>,
    processor: P,
    config: ClientConfig,
}

impl<P: EventProcessor> Client<P> {
    pub fn new(name: &'static str, handler: Arc<Handler>, processor: P) -> Self {
        Self {
            name,
            handler,
            processor,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs until shutdown. Re-initializes the stream whenever the server
    /// restarts; processing failures stop the watermark so the failed event
    /// is redelivered.
    #[instrument(skip(self, shutdown), fields(client = self.name))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut init = match self.handler.init_stream(self.name) {
            Ok(init) => init,
            Err(e) => {
                error!(error = %e, "event stream registration rejected");
                return;
            }
        };
        info!(min_offset = init.min_offset, "event stream client started");
        let mut next_offset = init.min_offset;
        let mut purge_offset = init.min_offset;

        loop {
            if *shutdown.borrow() {
                info!("event stream client stopping");
                return;
            }

            let pulled = self
                .handler
                .wait_for_events(
                    init.stream_id,
                    self.name,
                    next_offset,
                    purge_offset,
                    self.config.batch_size,
                    self.config.poll_timeout,
                )
                .await;

            let events = match pulled {
                Ok(events) => events,
                Err(EventStreamError::InvalidStreamId { .. })
                | Err(EventStreamError::OffsetOutOfRange { .. }) => {
                    // Server restarted or our window was purged; resume from
                    // whatever it retains now.
                    match self.handler.init_stream(self.name) {
                        Ok(fresh) => {
                            warn!(
                                min_offset = fresh.min_offset,
                                "re-initialized event stream"
                            );
                            init = fresh;
                            next_offset = fresh.min_offset.max(next_offset);
                            purge_offset = next_offset;
                            continue;
                        }
                        Err(e) => {
                            error!(error = %e, "event stream re-registration rejected");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "event pull failed");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                    continue;
                }
            };

            for event in events {
                let offset = event.offset;
                match self.processor.process(event).await {
                    Ok(()) => {
                        next_offset = offset + 1;
                        purge_offset = offset + 1;
                    }
                    Err(e) => {
                        warn!(offset, error = %e, "event processing failed, will redeliver");
                        break;
                    }
                }
            }
            debug!(next_offset, "event batch processed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::events::{EventPayload, TaskStatusEvent};
    use armada_api::task::TaskState;
    use armada_id::{JobId, PodId, TaskId};
    use chrono::Utc;
    use std::sync::Mutex;

    const CLIENTS: &[&str] = &["jobmgr"];

    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl EventProcessor for Arc<Recorder> {
        async fn process(&self, event: Event) -> Result<(), armada_api::Error> {
            self.seen.lock().unwrap().push(event.offset);
            Ok(())
        }
    }

    fn payload() -> EventPayload {
        EventPayload::TaskStatus(TaskStatusEvent {
            task_id: TaskId::new(JobId::new(), 0),
            pod_id: PodId::new(),
            state: TaskState::Running,
            message: String::new(),
            reason: String::new(),
            hostname: None,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn client_processes_in_order_and_purges() {
        let handler = Arc::new(Handler::new(16, CLIENTS));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let client = Client::new("jobmgr", handler.clone(), recorder.clone()).with_config(
            ClientConfig {
                batch_size: 10,
                poll_timeout: Duration::from_millis(20),
                error_backoff: Duration::from_millis(10),
            },
        );

        for _ in 0..5 {
            handler.add_event(payload()).unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { client.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(handler.min_offset(), 5);
    }
}
