//! Structured error types for provlog
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// Raw descriptor number outside the identity table (fatal: the table would be corrupted)
    #[error("Descriptor {fd} outside tracked range 0..{max}")]
    DescriptorOutOfRange { fd: i32, max: usize },

    #[error("Stable id counter exhausted after {0} identities")]
    IdentitiesExhausted(u32),

    #[error("Write offset {offset} + {delta} overflows u64")]
    OffsetOverflow { offset: u64, delta: u64 },

    #[error("Name contains a newline and cannot be logged: {0:?}")]
    UnrepresentableName(String),

    #[error("Failed to write provenance log: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Provenance session terminated by an earlier log failure")]
    SessionTerminated,

    #[error("Tracker state lock poisoned")]
    LockPoisoned,
}

impl TrackerError {
    /// Returns true if the log stream itself has failed
    #[must_use]
    pub fn is_stream_failure(&self) -> bool {
        matches!(self, TrackerError::Stream(_) | TrackerError::SessionTerminated)
    }
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Line {line}: invalid event: {source}")]
    InvalidEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: {source}")]
    Tracker {
        line: usize,
        #[source]
        source: TrackerError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    /// The underlying tracker error, if the replay stopped on one
    #[must_use]
    pub fn tracker_error(&self) -> Option<&TrackerError> {
        match self {
            ReplayError::Tracker { source, .. } => Some(source),
            _ => None,
        }
    }
}
