//! Shared error types.
//!
//! Each subsystem crate defines its own [`thiserror`] enum; this module holds
//! the errors that cross crate boundaries.

use thiserror::Error;

/// A specialized `Result` for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core event model and bus.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// An event violated a model invariant (confidence range, monotonicity).
    #[error("invalid event from '{detector}': {message}")]
    InvalidEvent {
        /// Detector that produced the event.
        detector: String,
        /// What was wrong with it.
        message: String,
    },

    /// A control request could not be interpreted.
    #[error("unknown control request: {0}")]
    UnknownControl(String),

    /// Serialization failure for an event, alert, or envelope.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an invalid-event error.
    pub fn invalid_event(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            detector: detector.into(),
            message: message.into(),
        }
    }
}
