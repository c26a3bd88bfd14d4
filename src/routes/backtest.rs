//! # routes::backtest
//!
//! Replays recorded signals through the position simulator, either once
//! (`POST /api/backtest`) or once per candidate weight set
//! (`POST /api/backtest/optimize`, add `?format=csv` for a spreadsheet).
//!
//! Ticks come either pre-tagged (`ticks`: signal + breaker state) or raw
//! (`feed`: signal + market snapshot), in which case a private breaker
//! replays the snapshots to derive each tick's state.  The simulation runs
//! on the blocking pool so a large sweep never stalls the runtime.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    breaker::BreakerConfig,
    engine::{
        book::ReplayTick,
        feed::{replay_feed, FeedTick, HistoricalFeed},
        optimizer::{presets, run_weight_optimization, Candidate, RankBy},
        simulator::{run_backtest, BacktestConfig, BacktestConfigInput},
    },
    error::AppError,
    state::SharedState,
};

// ─── Tick Source ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TickSource {
    /// Signals already tagged with the breaker state of their tick.
    pub ticks: Option<Vec<ReplayTick>>,
    /// Signals paired with the market snapshot seen at the same instant.
    pub feed:  Option<Vec<FeedTick>>,
}

impl TickSource {
    /// Resolves the request's ticks, falling back to `BACKTEST_FEED_FILE`.
    fn into_ticks(self, breaker: BreakerConfig, fallback: Option<&str>) -> Result<Vec<ReplayTick>, AppError> {
        let mut feed = match (self.ticks, self.feed) {
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "provide either `ticks` or `feed`, not both".to_string(),
                ));
            }
            (Some(ticks), None) => return Ok(ticks),
            (None, Some(feed)) => HistoricalFeed::new(feed),
            (None, None) => {
                let Some(path) = fallback else {
                    return Err(AppError::BadRequest(
                        "no data: provide `ticks` or `feed` (or set BACKTEST_FEED_FILE)".to_string(),
                    ));
                };
                let feed = HistoricalFeed::load(path)?;
                if feed.is_empty() {
                    return Err(AppError::BadRequest(format!("feed file {path} holds no ticks")));
                }
                info!(path, ticks = feed.len(), "📂 Replaying default feed file");
                feed
            }
        };
        Ok(replay_feed(&mut feed, breaker))
    }
}

/// Runs `job` on the blocking pool (file reads and simulations).
async fn blocking<T, F>(job: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("simulation task failed: {e}")))?
}

// ─── Single Backtest ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    #[serde(default)]
    pub config: BacktestConfigInput,
    #[serde(flatten)]
    pub source: TickSource,
}

/// POST /api/backtest
pub async fn backtest(
    State(state): State<SharedState>,
    Json(req): Json<BacktestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let config = BacktestConfig::new(req.config)?;
    let breaker = state.config.breaker;
    let fallback = state.config.backtest_feed.clone();

    let result = blocking(move || {
        let ticks = req.source.into_ticks(breaker, fallback.as_deref())?;
        Ok(run_backtest(&config, &ticks))
    })
    .await?;
    Ok(Json(json!({ "ok": true, "result": result })))
}

// ─── Weight Optimization ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    /// Shared settings; each candidate only swaps the weights.
    #[serde(default)]
    pub base:       BacktestConfigInput,
    /// Defaults to the built-in presets.
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub rank_by:    RankBy,
    #[serde(flatten)]
    pub source:     TickSource,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeQuery {
    pub format: Option<String>,
}

/// POST /api/backtest/optimize[?format=csv]
pub async fn optimize(
    State(state): State<SharedState>,
    Query(query): Query<OptimizeQuery>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Response, AppError> {
    let as_csv = match query.format.as_deref() {
        None | Some("json") => false,
        Some("csv") => true,
        Some(other) => {
            return Err(AppError::BadRequest(format!("unsupported format `{other}`")));
        }
    };

    let candidates = req.candidates.unwrap_or_else(presets);
    if candidates.is_empty() {
        return Err(AppError::BadRequest("no candidates to evaluate".to_string()));
    }
    // base settings must be valid on their own; per-candidate weights are
    // checked inside the sweep
    BacktestConfig::new(req.base.clone())?;

    let breaker = state.config.breaker;
    let fallback = state.config.backtest_feed.clone();
    let (base, rank_by, source) = (req.base, req.rank_by, req.source);

    let report = blocking(move || {
        let ticks = source.into_ticks(breaker, fallback.as_deref())?;
        Ok(run_weight_optimization(&base, &candidates, &ticks, rank_by))
    })
    .await?;

    if as_csv {
        let csv = report.to_csv()?;
        Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
    } else {
        Ok(Json(json!({ "ok": true, "report": report })).into_response())
    }
}
