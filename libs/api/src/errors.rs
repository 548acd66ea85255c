//! Shared error taxonomy.
//!
//! Every component keeps its own `thiserror` enum; what crosses component
//! boundaries is the *kind*, so retry policies can classify failures without
//! downcasting through source chains.

use thiserror::Error;

/// The failure classes recognized across the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced entity does not exist.
    NotFound,
    /// A create collided with an existing entity.
    AlreadyExists,
    /// The caller supplied an invalid request.
    Invalid,
    /// An optimistic write lost a revision race.
    Concurrent,
    /// A rate limit or quota was hit.
    ResourceExhausted,
    /// A collaborator is transiently unreachable.
    Unavailable,
    /// The operation exceeded its deadline.
    DeadlineExceeded,
    /// An internal invariant was broken.
    Internal,
    /// The state requires operator intervention.
    Fatal,
}

impl ErrorKind {
    /// True for kinds that local retry policies may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable | ErrorKind::DeadlineExceeded | ErrorKind::Concurrent
        )
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Concurrent => "concurrent",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Internal => "internal",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified error carried across client boundaries.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the failure class.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn concurrent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Concurrent, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// True if a local retry policy may retry this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Unavailable.is_retryable());
        assert!(ErrorKind::DeadlineExceeded.is_retryable());
        assert!(ErrorKind::Concurrent.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Invalid.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn error_display_includes_kind() {
        let err = Error::not_found("job job_x missing");
        assert_eq!(err.to_string(), "not_found: job job_x missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
