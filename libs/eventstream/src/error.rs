//! Event stream error types.

use armada_api::ErrorKind;
use armada_id::StreamId;
use thiserror::Error;

/// Errors surfaced to event stream consumers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    /// The client name is not on the allow-list.
    #[error("unsupported event stream client: {0}")]
    ClientUnsupported(String),

    /// The stream id does not match the server's current stream; the server
    /// restarted and the consumer must re-initialize.
    #[error("invalid stream id {got}, server stream is {current}")]
    InvalidStreamId { got: StreamId, current: StreamId },

    /// The requested begin offset was already purged or is past the head.
    #[error("offset {requested} out of range [{min}, {max})")]
    OffsetOutOfRange {
        requested: u64,
        min: u64,
        max: u64,
    },

    /// The purge offset moved backwards or past the head.
    #[error("invalid purge offset {requested}, watermark is {watermark}, head is {head}")]
    InvalidPurgeOffset {
        requested: u64,
        watermark: u64,
        head: u64,
    },

    /// The buffer is full; every registered client must purge before new
    /// events fit.
    #[error("event buffer full at capacity {capacity}")]
    BufferFull { capacity: usize },
}

impl EventStreamError {
    /// Maps onto the shared failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStreamError::ClientUnsupported(_) => ErrorKind::Invalid,
            EventStreamError::InvalidStreamId { .. } => ErrorKind::Unavailable,
            EventStreamError::OffsetOutOfRange { .. } => ErrorKind::Invalid,
            EventStreamError::InvalidPurgeOffset { .. } => ErrorKind::Invalid,
            EventStreamError::BufferFull { .. } => ErrorKind::ResourceExhausted,
        }
    }
}
