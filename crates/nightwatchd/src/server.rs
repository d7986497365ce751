//! Local stream/control/health server.
//!
//! - `GET /ws` — WebSocket stream of framed JSON envelopes
//!   (`event | channel | alert | status`), fanned out from the bus. This is
//!   the sole boundary used by external bridges; the core runs fine with no
//!   client attached.
//! - `POST /control` — control inbox; unknown request types get an error
//!   reply, every accepted operation is idempotent.
//! - `GET /health` — per-component status and bus drop counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use nightwatch_core::envelope::ControlReply;
use nightwatch_core::health::ComponentHealth;
use nightwatch_core::{
    Alert, BusCounters, ControlRequest, EventBus, HealthSnapshot, StreamEnvelope,
};
use nightwatch_notify::PauseState;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared state behind the routes.
#[derive(Clone)]
pub struct AppState {
    /// The process bus.
    pub bus: Arc<EventBus>,
    /// Bus drop counters.
    pub bus_counters: Arc<BusCounters>,
    /// Open alerts (owned by the alert engine).
    pub active_alerts: Arc<RwLock<HashMap<String, Alert>>>,
    /// Per-detector health (refreshed by the alert engine).
    pub detector_health: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    /// Pause state (owned by the orchestrator).
    pub pause: watch::Receiver<PauseState>,
}

impl AppState {
    /// Assembles the current health snapshot.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let components = self.detector_health.read().clone();
        HealthSnapshot {
            status: HealthSnapshot::derive_status(&components),
            components,
            bus_dropped: self.bus_counters.snapshot(),
            active_alerts: self.active_alerts.read().len(),
            paused: self.pause.borrow().paused,
        }
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/control", post(control_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves until shutdown.
pub async fn serve(listen: String, state: AppState, mut shutdown: watch::Receiver<bool>) {
    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%listen, error = %e, "local server failed to bind; stream endpoint disabled");
            return;
        }
    };
    info!(%listen, "local stream/control endpoint listening");

    let app = router(state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(e) = server.await {
        warn!(error = %e, "local server error");
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health_snapshot())
}

async fn control_handler(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<ControlReply>) {
    match ControlRequest::from_json(&body) {
        Ok(request) => {
            debug!(?request, "control request accepted");
            state.bus.publish_control(request);
            (StatusCode::OK, Json(ControlReply::accepted()))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ControlReply::rejected(e.to_string())),
        ),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_socket(socket, state))
}

/// Fans the bus out to one WebSocket client. Each subscriber has its own
/// bounded inbox, so a slow client loses its own oldest frames without
/// affecting the pipeline or other clients.
async fn stream_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.bus.subscribe_events("ws-client");
    let mut channels = state.bus.subscribe_channels("ws-client");
    let mut alerts = state.bus.subscribe_alerts("ws-client");
    let mut status_timer = tokio::time::interval(Duration::from_secs(5));

    loop {
        let envelope = tokio::select! {
            event = events.recv() => match event {
                Some(event) => StreamEnvelope::Event(event),
                None => break,
            },
            signal = channels.recv() => match signal {
                Some(signal) => StreamEnvelope::Channel(signal),
                None => break,
            },
            alert = alerts.recv() => match alert {
                Some(alert) => StreamEnvelope::Alert(alert),
                None => break,
            },
            _ = status_timer.tick() => StreamEnvelope::Status(state.health_snapshot()),
            incoming = socket.recv() => match incoming {
                // The stream is publish-only; inbound frames are ignored,
                // closure ends the task.
                Some(Ok(_)) => continue,
                _ => break,
            },
        };

        let Ok(frame) = envelope.to_json() else { continue };
        if socket.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }
    debug!("stream client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::{ComponentStatus, SystemStatus};

    fn state() -> (AppState, watch::Sender<PauseState>) {
        let bus = Arc::new(EventBus::new());
        let (pause_tx, pause_rx) = watch::channel(PauseState::active());
        (
            AppState {
                bus_counters: bus.counters(),
                bus,
                active_alerts: Arc::new(RwLock::new(HashMap::new())),
                detector_health: Arc::new(RwLock::new(BTreeMap::new())),
                pause: pause_rx,
            },
            pause_tx,
        )
    }

    #[tokio::test]
    async fn control_accepts_known_and_rejects_unknown() {
        let (state, _pause) = state();
        let mut control = state.bus.subscribe_control("test");

        let (status, reply) = control_handler(
            State(state.clone()),
            r#"{"type":"pause","minutes":15}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(reply.0.ok);
        assert_eq!(
            control.try_recv(),
            Some(ControlRequest::Pause { minutes: 15 })
        );

        let (status, reply) = control_handler(
            State(state),
            r#"{"type":"reboot_into_orbit"}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!reply.0.ok);
        assert!(reply.0.error.is_some());
    }

    #[tokio::test]
    async fn health_snapshot_reflects_components_and_pause() {
        let (state, pause_tx) = state();

        state.detector_health.write().insert(
            "radar".to_string(),
            ComponentHealth {
                status: ComponentStatus::Online,
                last_update: Some(1.0),
                transient_errors: 0,
            },
        );
        state.detector_health.write().insert(
            "audio".to_string(),
            ComponentHealth {
                status: ComponentStatus::Degraded,
                last_update: Some(0.5),
                transient_errors: 3,
            },
        );

        let snapshot = state.health_snapshot();
        assert_eq!(snapshot.status, SystemStatus::Degraded);
        assert_eq!(snapshot.components.len(), 2);
        assert!(!snapshot.paused);

        pause_tx
            .send(PauseState {
                paused: true,
                pause_until: Some(60.0),
            })
            .unwrap();
        assert!(state.health_snapshot().paused);
    }
}
