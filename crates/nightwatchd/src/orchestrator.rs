//! Process lifecycle: wires the bus, fusion, alerting, notification, and
//! detector workers, owns the pause state, and handles graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use nightwatch_alerts::AlertEngine;
use nightwatch_config::NightwatchConfig;
use nightwatch_core::{Clock, ComponentStatus, ControlRequest, EventBus, SystemClock};
use nightwatch_detectors::{
    AudioDetector, AudioDetectorConfig, BcgDetector, BcgDetectorConfig, DetectorCounters,
    EventEmitter, RadarDetector, RadarDetectorConfig,
};
use nightwatch_drivers::mock::{AnomalyHandle, MockAdcSource, MockAudioSource, MockRadarSource};
use nightwatch_drivers::{
    AdcSource, AudioSource, BaselineStore, I2cAdcDriver, Ld2450Driver, PcmCaptureDriver,
    RadarSource,
};
use nightwatch_fusion::FusionEngine;
use nightwatch_notify::{AlarmSink, NotificationSink, Notifier, PauseState, PushSink};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::server;

/// Fatal run outcomes mapped to exit codes by `main`.
#[derive(Debug)]
pub enum RunError {
    /// All hardware failed through the startup grace window (exit 3).
    Hardware(String),
    /// Anything else unexpected (exit 4).
    Fatal(String),
}

/// Per-detector shutdown budget.
const DETECTOR_STOP_BUDGET: Duration = Duration::from_secs(3);

/// Runs the monitor until SIGINT/SIGTERM.
pub async fn run(config: NightwatchConfig) -> Result<(), RunError> {
    let clock: Arc<dyn Clock> = SystemClock::shared();
    let bus = Arc::new(EventBus::new());
    let counters = DetectorCounters::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pause_tx, pause_rx) = watch::channel(PauseState::active());

    // Fusion engine.
    let fusion = FusionEngine::new(config.fusion.clone(), Arc::clone(&bus), Arc::clone(&clock));
    tokio::spawn(fusion.run(shutdown_rx.clone()));

    // Alert engine.
    let expected = enabled_detectors(&config);
    let engine = AlertEngine::new(
        config.alert_engine.clone(),
        expected.clone(),
        config.fusion.signal_max_age_seconds * 2.0,
        Arc::clone(&bus),
        Arc::clone(&clock),
    );
    let active_alerts = engine.active_handle();
    let detector_health = engine.health_handle();
    tokio::spawn(engine.run(shutdown_rx.clone()));

    // Notifier.
    let alarm = AlarmSink::new(config.notifiers.audio.clone());
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if config.notifiers.push.enabled {
        match PushSink::new(config.notifiers.push.clone()) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => warn!(error = %e, "push sink disabled"),
        }
    }
    let notifier = Notifier::new(Arc::clone(&bus), alarm, sinks, pause_rx.clone());
    tokio::spawn(notifier.run(shutdown_rx.clone()));

    // Detector workers.
    let detectors = spawn_detectors(
        &config,
        Arc::clone(&bus),
        Arc::clone(&clock),
        Arc::clone(&counters),
        shutdown_rx.clone(),
    );
    if detectors.is_empty() {
        return Err(RunError::Fatal("no detectors enabled".to_string()));
    }
    info!(
        detectors = detectors.len(),
        mock = config.mock_sensors,
        "monitoring started"
    );

    // Pause bookkeeping driven by the control topic.
    tokio::spawn(pause_task(
        Arc::clone(&bus),
        Arc::clone(&clock),
        pause_tx,
        config.alert_engine.max_pause_minutes,
        shutdown_rx.clone(),
    ));

    // Local stream/control/health server.
    let state = server::AppState {
        bus: Arc::clone(&bus),
        bus_counters: bus.counters(),
        active_alerts,
        detector_health: Arc::clone(&detector_health),
        pause: pause_rx,
    };
    let listen = format!("{}:{}", config.server.host, config.server.port);
    tokio::spawn(server::serve(listen, state, shutdown_rx.clone()));

    // Hardware startup grace: if every detector is still offline after the
    // grace window, give up with exit 3.
    let grace = config.system.hardware_startup_grace_seconds;
    let grace_check = {
        let health = Arc::clone(&detector_health);
        async move {
            tokio::time::sleep(Duration::from_secs_f64(grace)).await;
            let health = health.read();
            let all_offline = !health.is_empty()
                && health.values().all(|h| h.status == ComponentStatus::Offline);
            if all_offline {
                Err(RunError::Hardware(format!(
                    "no detector produced data within {grace:.0}s"
                )))
            } else {
                Ok(())
            }
        }
    };

    // Run until a stop signal; the grace check can abort the run early.
    tokio::select! {
        result = grace_check => {
            result?;
            stop_signal().await;
        }
        _ = stop_signal() => {}
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    stop_detectors(detectors).await;

    // Let the engines flush in-flight alerts before the process exits.
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("shutdown complete");
    Ok(())
}

/// Runs one detector's calibration and persists the baseline.
pub async fn calibrate(config: &NightwatchConfig, detector: &str) -> Result<String, RunError> {
    let clock: Arc<dyn Clock> = SystemClock::shared();
    let store = BaselineStore::new(&config.system.data_dir);

    let outcome = match detector {
        "capacitive" | "bcg" => {
            let mut driver = I2cAdcDriver::new(
                &config.detectors.capacitive.i2c_bus,
                config.detectors.capacitive.i2c_address,
                config.detectors.capacitive.sample_rate,
                clock,
            );
            driver
                .connect()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let outcome = driver
                .calibrate()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let _ = driver.disconnect().await;
            outcome
        }
        "radar" => {
            let mut driver = Ld2450Driver::new(
                &config.detectors.radar.device,
                config.detectors.radar.baud_rate,
                clock,
            );
            driver
                .connect()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let outcome = driver
                .calibrate()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let _ = driver.disconnect().await;
            outcome
        }
        "audio" => {
            let mut driver = PcmCaptureDriver::new(
                &config.detectors.audio.device,
                config.detectors.audio.sample_rate,
                clock,
            );
            driver
                .connect()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let outcome = driver
                .calibrate()
                .await
                .map_err(|e| RunError::Hardware(e.to_string()))?;
            let _ = driver.disconnect().await;
            outcome
        }
        other => {
            return Err(RunError::Fatal(format!("unknown detector '{other}'")));
        }
    };

    if !outcome.baseline.is_empty() {
        store
            .save(canonical_name(detector), &outcome.baseline)
            .map_err(|e| RunError::Fatal(e.to_string()))?;
    }
    Ok(outcome.message)
}

fn canonical_name(detector: &str) -> &str {
    match detector {
        "bcg" => "capacitive",
        other => other,
    }
}

fn enabled_detectors(config: &NightwatchConfig) -> Vec<String> {
    let mut names = Vec::new();
    if config.detectors.radar.enabled {
        names.push("radar".to_string());
    }
    if config.detectors.audio.enabled {
        names.push("audio".to_string());
    }
    if config.detectors.capacitive.enabled {
        names.push("capacitive".to_string());
    }
    names
}

fn spawn_detectors(
    config: &NightwatchConfig,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    counters: Arc<DetectorCounters>,
    shutdown: watch::Receiver<bool>,
) -> Vec<(String, JoinHandle<()>)> {
    let mut handles = Vec::new();
    let anomalies = AnomalyHandle::new();

    if config.detectors.radar.enabled {
        let driver: Box<dyn RadarSource> = if config.mock_sensors {
            Box::new(MockRadarSource::new(Arc::clone(&clock), anomalies.clone()))
        } else {
            Box::new(Ld2450Driver::new(
                &config.detectors.radar.device,
                config.detectors.radar.baud_rate,
                Arc::clone(&clock),
            ))
        };
        let emitter = EventEmitter::new("radar", Arc::clone(&bus), Arc::clone(&clock));
        let detector = RadarDetector::new(
            driver,
            RadarDetectorConfig {
                update_rate_hz: config.detectors.radar.update_rate_hz,
                ..RadarDetectorConfig::default()
            },
            emitter,
            Arc::clone(&counters),
        );
        handles.push((
            "radar".to_string(),
            tokio::spawn(detector.run(shutdown.clone())),
        ));
    }

    if config.detectors.audio.enabled {
        let driver: Box<dyn AudioSource> = if config.mock_sensors {
            Box::new(MockAudioSource::new(
                config.detectors.audio.sample_rate,
                Arc::clone(&clock),
                anomalies.clone(),
            ))
        } else {
            Box::new(PcmCaptureDriver::new(
                &config.detectors.audio.device,
                config.detectors.audio.sample_rate,
                Arc::clone(&clock),
            ))
        };
        let emitter = EventEmitter::new("audio", Arc::clone(&bus), Arc::clone(&clock));
        let detector = AudioDetector::new(
            driver,
            AudioDetectorConfig {
                sample_rate: config.detectors.audio.sample_rate,
                silence_margin: config.detectors.audio.silence_margin,
                ..AudioDetectorConfig::default()
            },
            emitter,
            Arc::clone(&counters),
        );
        handles.push((
            "audio".to_string(),
            tokio::spawn(detector.run(shutdown.clone())),
        ));
    }

    if config.detectors.capacitive.enabled {
        let driver: Box<dyn AdcSource> = if config.mock_sensors {
            Box::new(MockAdcSource::new(Arc::clone(&clock), anomalies.clone()))
        } else {
            Box::new(I2cAdcDriver::new(
                &config.detectors.capacitive.i2c_bus,
                config.detectors.capacitive.i2c_address,
                config.detectors.capacitive.sample_rate,
                Arc::clone(&clock),
            ))
        };
        let emitter = EventEmitter::new("capacitive", Arc::clone(&bus), Arc::clone(&clock));
        let mut detector = BcgDetector::new(
            driver,
            BcgDetectorConfig {
                sample_rate: f64::from(config.detectors.capacitive.sample_rate),
                ..BcgDetectorConfig::default()
            },
            emitter,
            Arc::clone(&counters),
        );
        // Occupancy baseline from the calibration cache, rebuilt if missing.
        let store = BaselineStore::new(&config.system.data_dir);
        if let Some(baseline) = store.load("capacitive") {
            detector.apply_baseline(&baseline);
        }
        handles.push((
            "capacitive".to_string(),
            tokio::spawn(detector.run(shutdown.clone())),
        ));
    }

    handles
}

/// Watches the control topic for pause/resume and expires bounded pauses.
async fn pause_task(
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    pause_tx: watch::Sender<PauseState>,
    max_pause_minutes: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut control = bus.subscribe_control("pause");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let state = *pause_tx.borrow();
                if let (true, Some(until)) = (state.paused, state.pause_until) {
                    if clock.now_monotonic() >= until {
                        info!("pause expired, resuming notifications");
                        let _ = pause_tx.send(PauseState::active());
                    }
                }
            }
            request = control.recv() => match request {
                Some(ControlRequest::Pause { minutes }) => {
                    let minutes = minutes.min(max_pause_minutes);
                    let until = clock.now_monotonic() + minutes as f64 * 60.0;
                    info!(minutes, "notifications paused");
                    let _ = pause_tx.send(PauseState {
                        paused: true,
                        pause_until: Some(until),
                    });
                }
                Some(ControlRequest::Resume) => {
                    info!("notifications resumed");
                    let _ = pause_tx.send(PauseState::active());
                }
                Some(_) => {}
                None => break,
            },
        }
    }
}

async fn stop_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Joins each detector with its 3-second budget, in parallel; stragglers are
/// aborted so shutdown never hangs on a wedged device.
async fn stop_detectors(detectors: Vec<(String, JoinHandle<()>)>) {
    let stops = detectors.into_iter().map(|(name, mut handle)| async move {
        if tokio::time::timeout(DETECTOR_STOP_BUDGET, &mut handle)
            .await
            .is_err()
        {
            warn!(detector = %name, "did not stop within budget, aborting");
            handle.abort();
        }
    });
    futures::future::join_all(stops).await;
}
