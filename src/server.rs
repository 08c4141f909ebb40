//! ==============================================================================
//! server.rs - thin http layer over the game core
//! ==============================================================================
//!
//! purpose:
//!     maps the rpc surface onto HubSession / ScanAgent / FeedbackPort.
//!     handlers only translate; no game logic lives here.
//!
//! ```text
//!     hub:        /api/remote /api/statuses /api/buzzer /api/round ...
//!     satellite:  /status /unlock /lock /reset /led/:color /idle-start ...
//! ```
//!
//! ==============================================================================

use crate::agent::{AgentState, ScanAgent};
use crate::domain::{now_ms, Ack, IdleEpoch, IdleStartRequest, LightColor, StatusReport};
use crate::error::Error;
use crate::feedback::FeedbackPort;
use crate::rpc::SatelliteCommand;
use crate::session::{HubSession, RoundSnapshot, StatusTable};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

const BLINK_PERIOD: Duration = Duration::from_millis(500);

type ApiError = (StatusCode, Json<Ack>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(Ack::new(message)))
}

#[derive(Debug, Deserialize)]
struct LedParams {
    #[serde(default)]
    blink: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStartResponse {
    pub message: String,
    pub reference_timestamp: IdleEpoch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ButtonStatus {
    pub pressed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SatelliteStatus {
    pub satellite: String,
    pub status: String,
    pub active: bool,
}

/// set or blink a named colour on a node's own light
fn apply_led(feedback: &FeedbackPort, color: &str, blink: Option<u32>) -> Result<Json<Ack>, ApiError> {
    let color: LightColor = color.parse().map_err(bad_request)?;
    match blink {
        Some(times) if times > 0 => {
            let feedback = feedback.clone();
            tokio::spawn(async move { feedback.blink(color, BLINK_PERIOD, BLINK_PERIOD, times).await });
            Ok(Json(Ack::new(format!("{} LED blinking", color.as_str()))))
        }
        _ => {
            feedback.set_color(color);
            Ok(Json(Ack::new(format!("{} LED on", color.as_str()))))
        }
    }
}

fn requested_epoch(body: Option<Json<IdleStartRequest>>) -> IdleEpoch {
    body.and_then(|Json(req)| req.reference_timestamp).unwrap_or_else(|| IdleEpoch(now_ms()))
}

// ==============================================================================
// hub
// ==============================================================================

#[derive(Clone)]
pub struct HubApi {
    pub session: HubSession,
    pub idle_slot: u8,
}

pub fn hub_router(api: HubApi) -> Router {
    Router::new()
        .route("/api/remote", post(remote_handler))
        .route("/api/statuses", get(statuses_handler))
        .route("/api/buzzer", get(buzzer_handler))
        .route("/api/buzzer/press", post(buzzer_press_handler))
        .route("/api/round", get(round_handler))
        .route("/api/round/start", post(round_start_handler))
        .route("/api/idle-start", post(hub_idle_start_handler))
        .route("/api/idle-stop", post(hub_idle_stop_handler))
        .route("/api/led/:color", post(hub_led_handler))
        .layer(CorsLayer::permissive())
        .with_state(api)
}

/// status report from a satellite
async fn remote_handler(
    State(api): State<HubApi>,
    Json(report): Json<StatusReport>,
) -> Result<Json<Ack>, ApiError> {
    match api.session.update_status(report.satellite_id.as_str(), report.verdict) {
        Ok(_) => Ok(Json(Ack::new("Status updated"))),
        Err(e @ Error::UnknownNode(_)) => {
            tracing::warn!(satellite = %report.satellite_id, "rejected report: {}", e);
            Err(bad_request(e.to_string()))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(Ack::new(e.to_string())))),
    }
}

async fn statuses_handler(State(api): State<HubApi>) -> Json<StatusTable> {
    Json(api.session.statuses())
}

/// reading clears the flag
async fn buzzer_handler(State(api): State<HubApi>) -> Json<ButtonStatus> {
    let pressed = api.session.take_button_pressed();
    tracing::debug!(pressed, "button flag polled");
    Json(ButtonStatus { pressed })
}

/// software press, same effect as the physical button
async fn buzzer_press_handler(State(api): State<HubApi>) -> Json<Ack> {
    api.session.note_button_pressed();
    api.session.start_round().await;
    Json(Ack::new("Round started"))
}

async fn round_handler(State(api): State<HubApi>) -> Json<RoundSnapshot> {
    Json(api.session.snapshot())
}

async fn round_start_handler(State(api): State<HubApi>) -> Json<Ack> {
    api.session.start_round().await;
    Json(Ack::new("Round started"))
}

/// start the hub's own animation and share the epoch with every satellite
async fn hub_idle_start_handler(
    State(api): State<HubApi>,
    body: Option<Json<IdleStartRequest>>,
) -> Json<IdleStartResponse> {
    let epoch = requested_epoch(body);
    api.session.feedback().start_idle(epoch, api.idle_slot).await;

    let session = api.session.clone();
    tokio::spawn(async move {
        let summary = session.rpc().broadcast(session.satellites(), SatelliteCommand::IdleStart(epoch)).await;
        tracing::info!(epoch = epoch.0, delivered = summary.delivered, failed = summary.failed, "idle epoch broadcast");
    });

    Json(IdleStartResponse { message: "Idle mode started".into(), reference_timestamp: epoch })
}

async fn hub_idle_stop_handler(State(api): State<HubApi>) -> Json<Ack> {
    api.session.feedback().stop_idle().await;

    let session = api.session.clone();
    tokio::spawn(async move {
        session.rpc().broadcast(session.satellites(), SatelliteCommand::IdleStop).await;
    });
    Json(Ack::new("Idle mode stopped"))
}

async fn hub_led_handler(
    State(api): State<HubApi>,
    Path(color): Path<String>,
    Query(params): Query<LedParams>,
) -> Result<Json<Ack>, ApiError> {
    apply_led(api.session.feedback(), &color, params.blink)
}

// ==============================================================================
// satellite
// ==============================================================================

#[derive(Clone)]
pub struct SatelliteApi {
    pub agent: Arc<ScanAgent>,
    pub feedback: FeedbackPort,
    pub idle_slot: u8,
}

pub fn satellite_router(api: SatelliteApi) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/unlock", post(unlock_handler))
        .route("/lock", post(lock_handler))
        .route("/reset", post(reset_handler))
        .route("/led/:color", post(satellite_led_handler))
        .route("/idle-start", post(satellite_idle_start_handler))
        .route("/idle-stop", post(satellite_idle_stop_handler))
        .layer(CorsLayer::permissive())
        .with_state(api)
}

/// check that the satellite is alive
async fn status_handler(State(api): State<SatelliteApi>) -> Json<SatelliteStatus> {
    Json(SatelliteStatus {
        satellite: api.agent.node_id().to_string(),
        status: "running".into(),
        active: api.agent.state() == AgentState::Active,
    })
}

async fn unlock_handler(State(api): State<SatelliteApi>) -> Json<Ack> {
    api.agent.unlock().await;
    Json(Ack::new("Unlocked"))
}

async fn lock_handler(State(api): State<SatelliteApi>) -> Json<Ack> {
    api.agent.lock();
    Json(Ack::new("Locked"))
}

async fn reset_handler(State(api): State<SatelliteApi>) -> Json<Ack> {
    api.agent.reset();
    Json(Ack::new("Reset"))
}

async fn satellite_led_handler(
    State(api): State<SatelliteApi>,
    Path(color): Path<String>,
    Query(params): Query<LedParams>,
) -> Result<Json<Ack>, ApiError> {
    apply_led(&api.feedback, &color, params.blink)
}

async fn satellite_idle_start_handler(
    State(api): State<SatelliteApi>,
    body: Option<Json<IdleStartRequest>>,
) -> Json<IdleStartResponse> {
    let epoch = requested_epoch(body);
    api.feedback.start_idle(epoch, api.idle_slot).await;
    Json(IdleStartResponse { message: "Idle mode started".into(), reference_timestamp: epoch })
}

async fn satellite_idle_stop_handler(State(api): State<SatelliteApi>) -> Json<Ack> {
    api.feedback.stop_idle().await;
    Json(Ack::new("Idle mode stopped"))
}
