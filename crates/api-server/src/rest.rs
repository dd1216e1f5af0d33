//! REST handlers for pacing decisions, spend tracking, and budget
//! status. Thin translation layer over `pacer_engine::DecisionEngine` —
//! no business logic lives here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use pacer_core::types::DenyReason;
use pacer_engine::DecisionEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub node_id: String,
    pub start_time: Instant,
    pub health: pacer_core::health::HealthFlag,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub campaign_id: String,
    pub bid_cents: i64,
    /// Accepted for symmetry with `/spend/track` but unused: `Decide`
    /// has no idempotence requirement, only `Track` does.
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub allow_bid: bool,
    pub throttle_rate: f64,
    pub reason: DenyReason,
}

/// POST /pacing/decision
pub async fn handle_decision(
    State(state): State<AppState>,
    Json(req): Json<DecisionRequest>,
) -> Json<DecisionResponse> {
    let decision = state.engine.decide(&req.campaign_id, req.bid_cents);
    Json(DecisionResponse {
        allow_bid: decision.allow_bid,
        throttle_rate: decision.throttle_rate,
        reason: decision.reason,
    })
}

#[derive(Deserialize)]
pub struct TrackRequest {
    pub campaign_id: String,
    pub spend_cents: i64,
    pub impressions: i64,
    pub at: Option<DateTime<Utc>>,
    pub event_id: Option<String>,
}

#[derive(Serialize)]
pub struct TrackResponse {
    pub day_spent_cents: i64,
    pub hourly_spent_cents: [i64; 24],
    pub breaker_state: pacer_core::types::BreakerPhase,
    pub pace_percentage: f64,
}

/// POST /spend/track
pub async fn handle_track(
    State(state): State<AppState>,
    Json(req): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, (StatusCode, Json<ErrorResponse>)> {
    if req.spend_cents < 0 {
        metrics::counter!("pacer.api.invalid_track").increment(1);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_spend".to_string(),
                message: "spend_cents must be non-negative".to_string(),
            }),
        ));
    }

    let outcome = state.engine.track(
        &req.campaign_id,
        req.spend_cents,
        req.impressions,
        req.at,
        req.event_id.as_deref(),
    );

    if !outcome.enqueued {
        let err = pacer_core::PacerError::QueueFull;
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "queue_full".to_string(),
                message: err.to_string(),
            }),
        ));
    }

    Ok(Json(TrackResponse {
        day_spent_cents: outcome.snapshot.day_spent_cents,
        hourly_spent_cents: outcome.snapshot.hourly_spent_cents,
        breaker_state: outcome.breaker_state,
        pace_percentage: outcome.pace_percentage,
    }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub campaign_id: String,
    pub daily_budget_cents: Option<i64>,
    pub day_spent_cents: i64,
    pub hourly_spent_cents: [i64; 24],
    pub impressions: i64,
    pub pace_percentage: f64,
    pub should_throttle: bool,
    pub throttle_rate: f64,
    pub breaker_state: pacer_core::types::BreakerPhase,
    pub circuit_breaker_open: bool,
}

/// GET /budget/status/{campaign_id}
pub async fn handle_status(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Json<StatusResponse> {
    let status = state.engine.status(&campaign_id);
    Json(StatusResponse {
        campaign_id: status.campaign_id,
        daily_budget_cents: status.daily_budget_cents,
        day_spent_cents: status.day_spent_cents,
        hourly_spent_cents: status.hourly_spent_cents,
        impressions: status.impressions,
        pace_percentage: status.pace_percentage,
        should_throttle: status.should_throttle,
        throttle_rate: status.throttle_rate,
        breaker_state: status.breaker_state,
        circuit_breaker_open: status.circuit_breaker_open,
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.health.is_healthy();
    let body = Json(HealthResponse {
        status: if healthy { "healthy".to_string() } else { "degraded".to_string() },
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    });
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, body)
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
