//! The event stream server side: bounded buffer plus per-client watermarks.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use armada_api::events::EventPayload;
use armada_id::StreamId;

use crate::error::EventStreamError;

const METRIC_EVENTS_ADDED: &str = "armada_eventstream_events_added";
const METRIC_EVENTS_PURGED: &str = "armada_eventstream_events_purged";

/// One event on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Monotonically increasing position on the stream.
    pub offset: u64,
    pub payload: EventPayload,
}

/// The result of registering a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInit {
    /// Identifies this incarnation of the server; stale ids are rejected.
    pub stream_id: StreamId,
    /// The earliest offset still retained; consumers resume here.
    pub min_offset: u64,
}

struct ClientState {
    /// Everything below this offset has been processed by the client.
    purge_offset: u64,
}

struct Inner {
    buffer: VecDeque<Event>,
    /// Offset the next appended event receives.
    head_offset: u64,
    /// Earliest retained offset.
    tail_offset: u64,
    clients: HashMap<&'static str, ClientState>,
}

impl Inner {
    fn advance_tail(&mut self) -> u64 {
        let watermark = self
            .clients
            .values()
            .map(|c| c.purge_offset)
            .min()
            .unwrap_or(self.head_offset);
        let mut purged = 0;
        while self.tail_offset < watermark {
            self.buffer.pop_front();
            self.tail_offset += 1;
            purged += 1;
        }
        purged
    }
}

/// The event stream server.
///
/// One handler exists per process; producers append, registered clients
/// pull. All state is behind one mutex; waiting happens outside it on a
/// [`Notify`].
pub struct Handler {
    stream_id: StreamId,
    capacity: usize,
    allowed_clients: &'static [&'static str],
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Handler {
    /// Creates a handler with the given buffer capacity and client
    /// allow-list. The stream id is fresh per construction, so consumers of
    /// a previous incarnation are forced to re-initialize.
    pub fn new(capacity: usize, allowed_clients: &'static [&'static str]) -> Self {
        let stream_id = StreamId::new();
        info!(stream_id = %stream_id, capacity, "event stream handler created");
        Self {
            stream_id,
            capacity,
            allowed_clients,
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(capacity),
                head_offset: 0,
                tail_offset: 0,
                clients: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Registers a consumer by name and returns its resume point.
    ///
    /// Registration is idempotent: re-registering keeps the client's
    /// existing purge watermark.
    pub fn init_stream(&self, client_name: &str) -> Result<StreamInit, EventStreamError> {
        let Some(name) = self
            .allowed_clients
            .iter()
            .find(|n| **n == client_name)
            .copied()
        else {
            return Err(EventStreamError::ClientUnsupported(client_name.to_string()));
        };

        let mut inner = self.lock();
        let tail = inner.tail_offset;
        inner
            .clients
            .entry(name)
            .or_insert(ClientState { purge_offset: tail });
        debug!(client = name, min_offset = tail, "event stream client registered");
        Ok(StreamInit {
            stream_id: self.stream_id,
            min_offset: tail,
        })
    }

    /// Appends one event and wakes waiting consumers.
    pub fn add_event(&self, payload: EventPayload) -> Result<u64, EventStreamError> {
        let mut inner = self.lock();
        if inner.buffer.len() >= self.capacity {
            let purged = inner.advance_tail();
            if purged > 0 {
                metrics::counter!(METRIC_EVENTS_PURGED, purged);
            }
        }
        if inner.buffer.len() >= self.capacity {
            warn!(capacity = self.capacity, "event buffer full, slowest client is behind");
            return Err(EventStreamError::BufferFull {
                capacity: self.capacity,
            });
        }

        let offset = inner.head_offset;
        inner.buffer.push_back(Event {
            offset,
            payload,
        });
        inner.head_offset += 1;
        drop(inner);

        metrics::counter!(METRIC_EVENTS_ADDED, 1);
        self.notify.notify_waiters();
        Ok(offset)
    }

    /// Returns up to `limit` events at or after `begin_offset`, advancing
    /// the client's purge watermark to `purge_offset` first.
    ///
    /// Blocks up to `timeout` when no events are available yet; returns an
    /// empty batch on timeout.
    pub async fn wait_for_events(
        &self,
        stream_id: StreamId,
        client_name: &str,
        begin_offset: u64,
        purge_offset: u64,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Event>, EventStreamError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.lock();
                self.check_stream_id(stream_id)?;
                self.apply_purge(&mut inner, client_name, purge_offset)?;

                if begin_offset < inner.tail_offset
                    || begin_offset > inner.head_offset
                {
                    return Err(EventStreamError::OffsetOutOfRange {
                        requested: begin_offset,
                        min: inner.tail_offset,
                        max: inner.head_offset,
                    });
                }

                if begin_offset < inner.head_offset {
                    let skip = (begin_offset - inner.tail_offset) as usize;
                    let events = inner
                        .buffer
                        .iter()
                        .skip(skip)
                        .take(limit)
                        .cloned()
                        .collect();
                    return Ok(events);
                }
            }

            // Nothing at or past begin_offset yet; wait for a producer.
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    /// The earliest offset still retained.
    pub fn min_offset(&self) -> u64 {
        self.lock().tail_offset
    }

    /// The offset the next event will receive.
    pub fn head_offset(&self) -> u64 {
        self.lock().head_offset
    }

    fn check_stream_id(&self, stream_id: StreamId) -> Result<(), EventStreamError> {
        if stream_id != self.stream_id {
            return Err(EventStreamError::InvalidStreamId {
                got: stream_id,
                current: self.stream_id,
            });
        }
        Ok(())
    }

    fn apply_purge(
        &self,
        inner: &mut Inner,
        client_name: &str,
        purge_offset: u64,
    ) -> Result<(), EventStreamError> {
        let head = inner.head_offset;
        let Some(client) = inner.clients.get_mut(client_name) else {
            return Err(EventStreamError::ClientUnsupported(client_name.to_string()));
        };
        if purge_offset < client.purge_offset || purge_offset > head {
            return Err(EventStreamError::InvalidPurgeOffset {
                requested: purge_offset,
                watermark: client.purge_offset,
                head,
            });
        }
        client.purge_offset = purge_offset;
        let purged = inner.advance_tail();
        if purged > 0 {
            metrics::counter!(METRIC_EVENTS_PURGED, purged);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned bus is unrecoverable for every component
        self.inner.lock().expect("event stream lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::events::{EventPayload, TaskStatusEvent};
    use armada_api::task::TaskState;
    use armada_id::{JobId, PodId, TaskId};
    use chrono::Utc;

    const CLIENTS: &[&str] = &["jobmgr", "resmgr"];

    fn payload(instance: u32) -> EventPayload {
        EventPayload::TaskStatus(TaskStatusEvent {
            task_id: TaskId::new(JobId::new(), instance),
            pod_id: PodId::new(),
            state: TaskState::Running,
            message: String::new(),
            reason: String::new(),
            hostname: None,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn offsets_increase_monotonically() {
        let handler = Handler::new(16, CLIENTS);
        for expected in 0..5 {
            assert_eq!(handler.add_event(payload(0)).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn unknown_client_is_rejected() {
        let handler = Handler::new(16, CLIENTS);
        let err = handler.init_stream("stranger").unwrap_err();
        assert_eq!(err, EventStreamError::ClientUnsupported("stranger".into()));
    }

    #[tokio::test]
    async fn consume_and_purge() {
        let handler = Handler::new(16, CLIENTS);
        let init = handler.init_stream("jobmgr").unwrap();
        assert_eq!(init.min_offset, 0);

        for i in 0..3 {
            handler.add_event(payload(i)).unwrap();
        }

        let events = handler
            .wait_for_events(init.stream_id, "jobmgr", 0, 0, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].offset, 0);
        assert_eq!(events[2].offset, 2);

        // purge everything processed; tail advances since jobmgr is the
        // only registered client
        let events = handler
            .wait_for_events(init.stream_id, "jobmgr", 3, 3, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(handler.min_offset(), 3);
    }

    #[tokio::test]
    async fn purge_waits_for_slowest_client() {
        let handler = Handler::new(16, CLIENTS);
        let init = handler.init_stream("jobmgr").unwrap();
        handler.init_stream("resmgr").unwrap();

        for i in 0..4 {
            handler.add_event(payload(i)).unwrap();
        }
        handler
            .wait_for_events(init.stream_id, "jobmgr", 0, 4, 10, Duration::from_millis(10))
            .await
            .unwrap();

        // resmgr has not purged anything yet
        assert_eq!(handler.min_offset(), 0);
    }

    #[tokio::test]
    async fn purged_offset_is_out_of_range() {
        let handler = Handler::new(16, CLIENTS);
        let init = handler.init_stream("jobmgr").unwrap();
        for i in 0..4 {
            handler.add_event(payload(i)).unwrap();
        }
        handler
            .wait_for_events(init.stream_id, "jobmgr", 0, 4, 10, Duration::from_millis(10))
            .await
            .unwrap();

        let err = handler
            .wait_for_events(init.stream_id, "jobmgr", 1, 4, 10, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStreamError::OffsetOutOfRange { .. }));
    }

    #[tokio::test]
    async fn backwards_purge_is_rejected() {
        let handler = Handler::new(16, CLIENTS);
        let init = handler.init_stream("jobmgr").unwrap();
        for i in 0..4 {
            handler.add_event(payload(i)).unwrap();
        }
        handler
            .wait_for_events(init.stream_id, "jobmgr", 0, 3, 10, Duration::from_millis(10))
            .await
            .unwrap();

        let err = handler
            .wait_for_events(init.stream_id, "jobmgr", 3, 2, 10, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStreamError::InvalidPurgeOffset { .. }));
    }

    #[tokio::test]
    async fn stale_stream_id_is_rejected() {
        let handler = Handler::new(16, CLIENTS);
        handler.init_stream("jobmgr").unwrap();
        let err = handler
            .wait_for_events(StreamId::new(), "jobmgr", 0, 0, 10, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStreamError::InvalidStreamId { .. }));
    }

    #[tokio::test]
    async fn buffer_full_when_no_client_purges() {
        let handler = Handler::new(2, CLIENTS);
        handler.init_stream("jobmgr").unwrap();
        handler.add_event(payload(0)).unwrap();
        handler.add_event(payload(1)).unwrap();
        let err = handler.add_event(payload(2)).unwrap_err();
        assert!(matches!(err, EventStreamError::BufferFull { .. }));
    }

    #[tokio::test]
    async fn wait_times_out_empty() {
        let handler = Handler::new(16, CLIENTS);
        let init = handler.init_stream("jobmgr").unwrap();
        let events = handler
            .wait_for_events(init.stream_id, "jobmgr", 0, 0, 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
