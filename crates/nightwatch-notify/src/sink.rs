//! Notification sink contract.

use async_trait::async_trait;
use nightwatch_core::Alert;
use thiserror::Error;

/// Delivery failure classification. A 4xx-style rejection is permanent;
/// 5xx/timeout-style failures are retried on the bounded schedule.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Worth retrying (server error, timeout, transport failure).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Retrying cannot help (bad credentials, rejected payload).
    #[error("permanent: {0}")]
    Permanent(String),
}

/// One delivery target for alerts.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logs and failure records.
    fn name(&self) -> &str;

    /// Delivers one alert. Called once per attempt; the notifier owns the
    /// retry schedule and deduplication.
    async fn notify(&self, alert: &Alert) -> Result<(), SinkError>;
}
