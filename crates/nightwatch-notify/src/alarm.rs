//! Local audio alarm.
//!
//! Plays a severity-mapped sound on repeat until the alert is acknowledged
//! or resolved, whichever comes first. A higher-severity alert preempts a
//! lower one. Critical alarms escalate volume on an interval; every alarm
//! stops hard at `max_duration_seconds`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nightwatch_config::AudioNotifierConfig;
use nightwatch_core::{Alert, Severity};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct ActiveAlarm {
    alert_id: String,
    severity: Severity,
    stop: watch::Sender<bool>,
}

/// The alarm player. One alarm at a time; severity decides preemption.
pub struct AlarmSink {
    config: AudioNotifierConfig,
    active: Arc<Mutex<Option<ActiveAlarm>>>,
}

impl AlarmSink {
    /// Creates an idle alarm.
    pub fn new(config: AudioNotifierConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// The alert currently sounding, if any.
    pub fn current_alert(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.alert_id.clone())
    }

    /// Starts (or preempts into) an alarm for the alert. A lower-severity
    /// alert never interrupts a higher one already sounding.
    pub fn trigger(&self, alert: &Alert) {
        if !self.config.enabled {
            return;
        }

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.severity >= alert.severity {
                debug!(
                    alert_id = %alert.id,
                    playing = %current.alert_id,
                    "alarm already sounding at equal or higher severity"
                );
                return;
            }
            let _ = current.stop.send(true);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *active = Some(ActiveAlarm {
            alert_id: alert.id.clone(),
            severity: alert.severity,
            stop: stop_tx,
        });
        drop(active);

        let config = self.config.clone();
        let severity = alert.severity;
        let alert_id = alert.id.clone();
        let slot = Arc::clone(&self.active);
        tokio::spawn(async move {
            play_loop(config, severity, stop_rx).await;
            let mut active = slot.lock();
            if active.as_ref().map(|a| a.alert_id.as_str()) == Some(alert_id.as_str()) {
                *active = None;
            }
        });
    }

    /// Stops the alarm if it is sounding for this alert (ack or resolve).
    pub fn stop(&self, alert_id: &str) {
        let active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.alert_id == alert_id {
                let _ = current.stop.send(true);
            }
        }
    }

    /// Stops whatever is sounding (shutdown).
    pub fn stop_all(&self) {
        if let Some(current) = self.active.lock().as_ref() {
            let _ = current.stop.send(true);
        }
    }
}

fn sound_file(config: &AudioNotifierConfig, severity: Severity) -> Option<PathBuf> {
    let name = match severity {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
        Severity::Info => "info",
    };
    for ext in ["wav", "ogg"] {
        let path = PathBuf::from(&config.sounds_dir).join(format!("{name}.{ext}"));
        if path.exists() {
            return Some(path);
        }
    }
    None
}

async fn play_loop(config: AudioNotifierConfig, severity: Severity, mut stop: watch::Receiver<bool>) {
    let sound = sound_file(&config, severity);
    let mut volume = u32::from(config.initial_volume);
    let started = tokio::time::Instant::now();
    let mut next_escalation = Duration::from_secs_f64(config.escalation_interval_seconds);

    debug!(?sound, %severity, "alarm started");
    loop {
        if *stop.borrow() {
            break;
        }
        if started.elapsed().as_secs_f64() >= config.max_duration_seconds {
            warn!(%severity, "alarm reached max duration, stopping");
            break;
        }

        // Volume escalation for critical alarms.
        if severity == Severity::Critical && started.elapsed() >= next_escalation {
            volume = (volume + 10).min(u32::from(config.max_volume));
            next_escalation += Duration::from_secs_f64(config.escalation_interval_seconds);
            debug!(volume, "alarm volume escalated");
        }

        play_once(&config, sound.as_deref()).await;

        // Brief gap between repeats, interruptible by stop.
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(800)) => {}
        }
    }
    debug!(%severity, "alarm stopped");
}

async fn play_once(config: &AudioNotifierConfig, sound: Option<&std::path::Path>) {
    let Some(path) = sound else {
        // No sound asset available; keep the repeat cadence anyway so the
        // stop/escalation logic behaves identically in development.
        tokio::time::sleep(Duration::from_millis(500)).await;
        return;
    };

    let mut parts = config.player_command.split_whitespace();
    let Some(program) = parts.next() else { return };
    let mut command = tokio::process::Command::new(program);
    command
        .args(parts)
        .arg(path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);

    match command.status().await {
        Ok(status) if !status.success() => {
            warn!(?path, %status, "alarm player exited with failure");
        }
        Err(e) => warn!(?path, error = %e, "alarm player failed to start"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(severity: Severity, mono: f64) -> Alert {
        Alert::create("rule", severity, "src", "msg", Utc::now(), mono)
    }

    fn config() -> AudioNotifierConfig {
        AudioNotifierConfig {
            sounds_dir: "/nonexistent".to_string(),
            ..AudioNotifierConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_runs_until_stopped() {
        let sink = AlarmSink::new(config());
        let a = alert(Severity::Warning, 1.0);

        sink.trigger(&a);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.current_alert(), Some(a.id.clone()));

        sink.stop(&a.id);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.current_alert(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn higher_severity_preempts() {
        let sink = AlarmSink::new(config());
        let warning = alert(Severity::Warning, 1.0);
        let critical = alert(Severity::Critical, 2.0);

        sink.trigger(&warning);
        tokio::time::sleep(Duration::from_secs(1)).await;
        sink.trigger(&critical);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.current_alert(), Some(critical.id.clone()));

        // A new warning does not displace the critical alarm.
        let warning2 = alert(Severity::Warning, 3.0);
        sink.trigger(&warning2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.current_alert(), Some(critical.id));
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_stops_at_max_duration() {
        let mut cfg = config();
        cfg.max_duration_seconds = 3.0;
        let sink = AlarmSink::new(cfg);
        let a = alert(Severity::Critical, 1.0);

        sink.trigger(&a);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.current_alert(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_alarm_never_starts() {
        let mut cfg = config();
        cfg.enabled = false;
        let sink = AlarmSink::new(cfg);
        sink.trigger(&alert(Severity::Critical, 1.0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.current_alert(), None);
    }
}
