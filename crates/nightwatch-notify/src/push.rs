//! Push providers: Pushover, ntfy, and generic webhooks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use nightwatch_config::{PushNotifierConfig, PushProvider};
use nightwatch_core::{Alert, Severity};
use tracing::info;

use crate::sink::{NotificationSink, SinkError};

/// Push notification sink over HTTP.
pub struct PushSink {
    config: PushNotifierConfig,
    client: reqwest::Client,
}

impl PushSink {
    /// Builds the sink and its HTTP client. External I/O is capped at 5 s
    /// regardless of configuration.
    pub fn new(config: PushNotifierConfig) -> Result<Self, SinkError> {
        let timeout = Duration::from_secs_f64(config.timeout_seconds.clamp(1.0, 5.0));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Permanent(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Pushover priority: -1 low, 0 normal, 1 high.
    fn pushover_priority(severity: Severity) -> i8 {
        match severity {
            Severity::Info => -1,
            Severity::Warning => 0,
            Severity::Critical => 1,
        }
    }

    /// ntfy priority: 1 min .. 5 urgent.
    fn ntfy_priority(severity: Severity) -> u8 {
        match severity {
            Severity::Info => 2,
            Severity::Warning => 3,
            Severity::Critical => 5,
        }
    }

    /// ntfy tag emoji per severity.
    fn ntfy_tags(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "information_source",
            Severity::Warning => "warning",
            Severity::Critical => "rotating_light",
        }
    }

    /// Pushover form payload for an alert.
    pub fn pushover_payload(&self, alert: &Alert) -> BTreeMap<String, String> {
        let mut form = BTreeMap::new();
        form.insert("token".to_string(), self.config.pushover_api_token.clone());
        form.insert("user".to_string(), self.config.pushover_user_key.clone());
        form.insert("title".to_string(), format!("Nightwatch: {}", alert.rule_name));
        form.insert("message".to_string(), alert.message.clone());
        form.insert(
            "priority".to_string(),
            Self::pushover_priority(alert.severity).to_string(),
        );
        form.insert(
            "sound".to_string(),
            if alert.severity == Severity::Critical {
                "siren".to_string()
            } else {
                "pushover".to_string()
            },
        );
        form
    }

    /// Webhook JSON payload for an alert.
    pub fn webhook_payload(alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "alert_id": alert.id,
            "rule": alert.rule_name,
            "severity": alert.severity,
            "source": alert.source,
            "message": alert.message,
            "triggered_at": alert.triggered_at,
        })
    }

    async fn send_pushover(&self, alert: &Alert) -> Result<(), SinkError> {
        let form = self.pushover_payload(alert);
        let response = self
            .client
            .post("https://api.pushover.net/1/messages.json")
            .form(&form)
            .send()
            .await
            .map_err(|e| SinkError::Retryable(format!("pushover: {e}")))?;
        classify_status(response.status())
    }

    async fn send_ntfy(&self, alert: &Alert) -> Result<(), SinkError> {
        let url = format!(
            "{}/{}",
            self.config.ntfy_server.trim_end_matches('/'),
            self.config.ntfy_topic
        );
        let response = self
            .client
            .post(&url)
            .header("Title", format!("Nightwatch: {}", alert.rule_name))
            .header("Priority", Self::ntfy_priority(alert.severity).to_string())
            .header("Tags", Self::ntfy_tags(alert.severity))
            .body(alert.message.clone())
            .send()
            .await
            .map_err(|e| SinkError::Retryable(format!("ntfy: {e}")))?;
        classify_status(response.status())
    }

    async fn send_webhook(&self, alert: &Alert) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.config.webhook_url)
            .json(&Self::webhook_payload(alert));
        for (key, value) in &self.config.webhook_headers {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Retryable(format!("webhook: {e}")))?;
        classify_status(response.status())
    }
}

/// 2xx ok, 4xx permanent, anything else retryable.
fn classify_status(status: reqwest::StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        Err(SinkError::Permanent(format!("status {status}")))
    } else {
        Err(SinkError::Retryable(format!("status {status}")))
    }
}

#[async_trait]
impl NotificationSink for PushSink {
    fn name(&self) -> &str {
        match self.config.provider {
            PushProvider::Pushover => "pushover",
            PushProvider::Ntfy => "ntfy",
            PushProvider::Webhook => "webhook",
        }
    }

    async fn notify(&self, alert: &Alert) -> Result<(), SinkError> {
        match self.config.provider {
            PushProvider::Pushover => self.send_pushover(alert).await?,
            PushProvider::Ntfy => self.send_ntfy(alert).await?,
            PushProvider::Webhook => self.send_webhook(alert).await?,
        }
        info!(alert_id = %alert.id, sink = self.name(), "push delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(severity: Severity) -> Alert {
        Alert::create(
            "respiration_critical",
            severity,
            "respiration_rate",
            "Respiration rate 3.0 BPM below safe minimum",
            Utc::now(),
            12.0,
        )
    }

    fn sink(provider: PushProvider) -> PushSink {
        PushSink::new(PushNotifierConfig {
            enabled: true,
            provider,
            pushover_user_key: "user".to_string(),
            pushover_api_token: "token".to_string(),
            ntfy_topic: "nightwatch".to_string(),
            webhook_url: "https://example.invalid/hook".to_string(),
            ..PushNotifierConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn pushover_payload_maps_severity() {
        let sink = sink(PushProvider::Pushover);

        let critical = sink.pushover_payload(&alert(Severity::Critical));
        assert_eq!(critical["priority"], "1");
        assert_eq!(critical["sound"], "siren");
        assert_eq!(critical["token"], "token");

        let warning = sink.pushover_payload(&alert(Severity::Warning));
        assert_eq!(warning["priority"], "0");
        assert_eq!(warning["sound"], "pushover");
    }

    #[test]
    fn webhook_payload_carries_identity() {
        let a = alert(Severity::Critical);
        let payload = PushSink::webhook_payload(&a);
        assert_eq!(payload["alert_id"], a.id);
        assert_eq!(payload["severity"], "critical");
        assert_eq!(payload["rule"], "respiration_critical");
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Err(SinkError::Permanent(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Err(SinkError::Permanent(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Err(SinkError::Retryable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(SinkError::Retryable(_))
        ));
    }

    #[test]
    fn ntfy_priorities() {
        assert_eq!(PushSink::ntfy_priority(Severity::Critical), 5);
        assert_eq!(PushSink::ntfy_priority(Severity::Warning), 3);
        assert_eq!(PushSink::ntfy_priority(Severity::Info), 2);
    }
}
