//! # routes::signals
//!
//! | Method | Path                   | Description                                  |
//! |--------|------------------------|----------------------------------------------|
//! | POST   | `/api/signals/scores`  | upstream sub-score (raw 0–10 or structured)  |
//! | GET    | `/api/signals/scores`  | current scoreboard with freshness flags      |
//! | POST   | `/api/signals/compute` | stateless weighted aggregation               |
//! | GET    | `/api/signals/history` | recorded `SignalRecord`s, newest first       |

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    engine::scoring::SourceOpinion,
    error::{AppError, ValidationError},
    models::{SignalSource, SourceScores, WeightMap},
    state::SharedState,
};

const DEFAULT_HISTORY_LIMIT: usize = 100;

// ─── Sub-score Submission ─────────────────────────────────────────────────────

/// Either a structured opinion, scored here, or a raw pre-scored value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScoreSubmission {
    Opinion {
        symbol:    String,
        opinion:   SourceOpinion,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Raw {
        symbol:    String,
        source:    SignalSource,
        score:     f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl ScoreSubmission {
    /// Normalised `(symbol, source, score, received_at)`.
    fn resolve(self) -> Result<(String, SignalSource, f64, DateTime<Utc>), ValidationError> {
        let (symbol, source, score, at) = match self {
            ScoreSubmission::Opinion { symbol, opinion, timestamp } => {
                (symbol, opinion.source(), opinion.score(), timestamp)
            }
            ScoreSubmission::Raw { symbol, source, score, timestamp } => {
                (symbol, source, score, timestamp)
            }
        };

        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        ValidationError::check_range("score", score, 0.0, 10.0)?;
        Ok((symbol, source, score, at.unwrap_or_else(Utc::now)))
    }
}

/// POST /api/signals/scores
pub async fn submit_score(
    State(state): State<SharedState>,
    Json(body): Json<ScoreSubmission>,
) -> Result<impl IntoResponse, AppError> {
    let (symbol, source, score, at) = body.resolve()?;
    state.scoreboard.submit(&symbol, source, score, at).await;

    Ok(Json(json!({
        "ok":     true,
        "symbol": symbol,
        "source": source,
        "score":  score,
    })))
}

/// GET /api/signals/scores
pub async fn get_scores(State(state): State<SharedState>) -> impl IntoResponse {
    let board = state.scoreboard.entries(Utc::now()).await;
    Json(json!({ "ok": true, "scores": board }))
}

// ─── Compute ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ComputeRequest {
    #[serde(default)]
    pub sources:              SourceScores,
    /// Defaults to the live weight map.
    pub weights:              Option<WeightMap>,
    /// Defaults to the live breaker's verdict.
    pub circuit_breaker_safe: Option<bool>,
}

/// POST /api/signals/compute
pub async fn compute(
    State(state): State<SharedState>,
    Json(req): Json<ComputeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let weights = match req.weights {
        Some(weights) => {
            weights.validate()?;
            weights
        }
        None => (*state.weights).clone(),
    };
    let safe = match req.circuit_breaker_safe {
        Some(safe) => safe,
        None => state.breaker.is_safe().await,
    };

    let signal = state.aggregator.compute(&req.sources, &weights, safe);
    Ok(Json(json!({
        "ok":                   true,
        "signal":               signal,
        "weights":              weights,
        "thresholds":           state.aggregator.config(),
        "circuit_breaker_safe": safe,
    })))
}

// ─── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub limit:  Option<usize>,
}

/// GET /api/signals/history?symbol=SUIUSDC&limit=100
pub async fn get_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let symbol = query.symbol.map(|s| s.trim().to_ascii_uppercase());
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state.recent_signals(symbol.as_deref(), limit).await;
    Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_submission_is_normalised() {
        let body: ScoreSubmission =
            serde_json::from_str(r#"{"symbol":" suiusdc ","source":"rl","score":7.5}"#).unwrap();
        let (symbol, source, score, _) = body.resolve().unwrap();
        assert_eq!(symbol, "SUIUSDC");
        assert_eq!(source, SignalSource::Rl);
        assert_eq!(score, 7.5);
    }

    #[test]
    fn structured_opinion_is_scored() {
        let body: ScoreSubmission = serde_json::from_str(
            r#"{"symbol":"SUIUSDC","opinion":{"source":"sentiment","polarity":1.0}}"#,
        )
        .unwrap();
        let (_, source, score, _) = body.resolve().unwrap();
        assert_eq!(source, SignalSource::Sentiment);
        assert!((0.0..=10.0).contains(&score));
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let body: ScoreSubmission =
            serde_json::from_str(r#"{"symbol":"SUIUSDC","source":"technical","score":11}"#).unwrap();
        assert!(matches!(body.resolve(), Err(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn blank_symbol_is_rejected() {
        let body: ScoreSubmission =
            serde_json::from_str(r#"{"symbol":"  ","source":"technical","score":5}"#).unwrap();
        assert_eq!(body.resolve().unwrap_err(), ValidationError::EmptySymbol);
    }
}
