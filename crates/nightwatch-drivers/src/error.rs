//! Driver error taxonomy.

use thiserror::Error;

/// A specialized `Result` for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors from sensor drivers.
///
/// `Transient` failures (timeouts, checksum noise, underruns) are retried
/// with backoff and surface only in health counters. `Fatal` failures mean
/// the device handle is gone until a reconnect.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Recoverable read problem; retry after backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// The connection is unusable until reconnect.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The device could not be opened at all.
    #[error("init: {0}")]
    Init(String),
}

impl DriverError {
    /// Transient error from any displayable cause.
    pub fn transient(cause: impl std::fmt::Display) -> Self {
        Self::Transient(cause.to_string())
    }

    /// Fatal error from any displayable cause.
    pub fn fatal(cause: impl std::fmt::Display) -> Self {
        Self::Fatal(cause.to_string())
    }

    /// Init error from any displayable cause.
    pub fn init(cause: impl std::fmt::Display) -> Self {
        Self::Init(cause.to_string())
    }

    /// True when retrying without reconnect is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}
