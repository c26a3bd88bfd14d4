//! # routes::breaker
//!
//! | Method | Path                    | Description                              |
//! |--------|-------------------------|------------------------------------------|
//! | GET    | `/api/breaker/status`   | full status snapshot                     |
//! | GET    | `/api/breaker/safe`     | `{ "safe": bool }`                       |
//! | POST   | `/api/breaker/evaluate` | feed one `MarketSnapshot` to the breaker |
//! | POST   | `/api/breaker/check`    | dry-run crash rules (no state change)    |
//! | POST   | `/api/breaker/trigger`  | manual halt                              |
//! | POST   | `/api/breaker/resume`   | manual resume (bypasses recovery checks) |
//! | GET    | `/api/breaker/events`   | audit log + statistics                   |

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    breaker::TriggerReason,
    error::AppError,
    models::MarketSnapshot,
    state::SharedState,
};

const DEFAULT_EVENT_LIMIT: usize = 50;

/// GET /api/breaker/status
pub async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.breaker.get_status().await;
    Json(json!({ "ok": true, "breaker": status }))
}

/// GET /api/breaker/safe
pub async fn is_safe(State(state): State<SharedState>) -> impl IntoResponse {
    let breaker_state = state.breaker.state().await;
    Json(json!({
        "ok":    true,
        "safe":  breaker_state.is_safe(),
        "state": breaker_state,
    }))
}

/// POST /api/breaker/evaluate
pub async fn evaluate(
    State(state): State<SharedState>,
    Json(snapshot): Json<MarketSnapshot>,
) -> impl IntoResponse {
    let evaluation = state.ingest_snapshot(&snapshot).await;
    Json(json!({
        "ok":           true,
        "state":        evaluation.state,
        "transitioned": evaluation.transitioned(),
        "events":       evaluation.events,
    }))
}

/// POST /api/breaker/check
pub async fn check(
    State(state): State<SharedState>,
    Json(snapshot): Json<MarketSnapshot>,
) -> impl IntoResponse {
    let check = state.breaker.check_crash_conditions(&snapshot).await;
    Json(json!({ "ok": true, "check": check }))
}

#[derive(Deserialize, Default)]
pub struct TriggerBody {
    pub reason:        Option<String>,
    pub snapshot:      Option<MarketSnapshot>,
    #[serde(default)]
    pub actions_taken: Vec<String>,
}

/// POST /api/breaker/trigger
pub async fn trigger(
    State(state): State<SharedState>,
    Json(body): Json<Option<TriggerBody>>,
) -> impl IntoResponse {
    let body = body.unwrap_or_default();
    let note = body
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Manual trigger via API".to_string());

    let event = state
        .breaker
        .trigger(TriggerReason::Manual { note }, body.snapshot, body.actions_taken)
        .await;

    match event {
        Some(event) => {
            state.publish_breaker_event(&event).await;
            Json(json!({ "ok": true, "triggered": true, "event": event }))
        }
        None => Json(json!({
            "ok":        true,
            "triggered": false,
            "message":   "Circuit breaker already halted",
        })),
    }
}

#[derive(Deserialize, Default)]
pub struct ResumeBody {
    /// Estimated USD protected while halted, recorded on the audit entry.
    pub capital_protected: Option<f64>,
}

/// POST /api/breaker/resume
pub async fn resume(
    State(state): State<SharedState>,
    Json(body): Json<Option<ResumeBody>>,
) -> Result<impl IntoResponse, AppError> {
    let capital = body.unwrap_or_default().capital_protected;
    if let Some(value) = capital {
        if !value.is_finite() || value < 0.0 {
            return Err(AppError::BadRequest(format!(
                "capital_protected must be a non-negative number, got {value}"
            )));
        }
    }

    let response = match state.breaker.resume(capital).await {
        Some(event) => {
            state.publish_breaker_event(&event).await;
            json!({ "ok": true, "resumed": true, "event": event })
        }
        None => json!({
            "ok":      true,
            "resumed": false,
            "message": "Circuit breaker already SAFE",
        }),
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/breaker/events?limit=50
pub async fn get_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let events = state.breaker.recent_events(limit).await;
    let statistics = state.breaker.statistics().await;
    Json(json!({
        "ok":         true,
        "count":      events.len(),
        "events":     events,
        "statistics": statistics,
    }))
}
