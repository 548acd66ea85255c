//! # armada-eventstream
//!
//! A bounded, ordered, resumable event bus between orchestrator components.
//!
//! The [`Handler`] owns a circular buffer of events with monotonically
//! increasing offsets. Consumers register by client name (from a static
//! allow-list), receive a stream id plus the current minimum offset, and
//! pull batches with [`Handler::wait_for_events`], advancing a per-client
//! purge watermark as they go. The buffer head advances over events every
//! registered client has purged.
//!
//! A restarted server invalidates old stream ids; consumers detect this via
//! [`EventStreamError::InvalidStreamId`] and re-initialize, resuming from
//! the server-reported minimum offset. [`Client`] packages that loop.

mod client;
mod error;
mod handler;

pub use client::{Client, EventProcessor};
pub use error::EventStreamError;
pub use handler::{Event, Handler, StreamInit};
