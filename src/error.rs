//! # error
//!
//! Centralised application error types.
//!
//! Every handler returns `Result<_, AppError>`.  Axum's `IntoResponse` impl
//! converts these into structured JSON error bodies so dashboards and
//! upstream collaborators always get a machine-readable response even on
//! failure.
//!
//! [`ValidationError`] is the construction-time error for configs, weight
//! maps and aggregator thresholds.  Invalid input is rejected with a precise
//! message and never silently clamped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::models::SignalSource;

// ─── ValidationError ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("weight for `{signal}` must be a finite non-negative number, got {value}")]
    InvalidWeight { signal: SignalSource, value: f64 },

    #[error("at least one signal weight must be positive")]
    NoPositiveWeight,

    #[error("buy_threshold ({buy}) must be greater than sell_threshold ({sell})")]
    InvertedThresholds { buy: f64, sell: f64 },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min:   f64,
        max:   f64,
    },

    #[error("unparsable {field} `{value}`: expected RFC 3339 or YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("start ({start}) must be before end ({end})")]
    InvertedPeriod { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl ValidationError {
    /// Checks `min <= value <= max` (and finiteness) for a named field.
    pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if value.is_finite() && value >= min && value <= max {
            Ok(())
        } else {
            Err(Self::OutOfRange { field, value, min, max })
        }
    }
}

// ─── AppError ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A config, weight map or threshold pair failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
