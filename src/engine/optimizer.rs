//! # engine::optimizer — Weight Sweep
//!
//! Runs one isolated backtest per candidate weight set over the same ticks
//! and base config, in parallel on the rayon pool, then ranks the results.
//! A candidate that fails validation yields an error row; the sweep goes on.

use std::cmp::Ordering;

use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::book::ReplayTick;
use crate::engine::metrics::Metrics;
use crate::engine::simulator::{run_backtest, BacktestConfig, BacktestConfigInput};
use crate::models::{SignalSource, WeightMap};

// ─── Candidates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name:    String,
    pub weights: WeightMap,
}

impl Candidate {
    fn preset(name: &str, w: [f64; 6]) -> Self {
        Self {
            name:    name.to_string(),
            weights: WeightMap::from_pairs(SignalSource::ALL.into_iter().zip(w)),
        }
    }
}

/// Built-in sweep: technical, rl, chart, multi-agent, market context,
/// sentiment.
pub fn presets() -> Vec<Candidate> {
    vec![
        Candidate::preset("baseline",        [0.25, 0.15, 0.30, 0.15, 0.10, 0.05]),
        Candidate::preset("technical_heavy", [0.40, 0.20, 0.20, 0.10, 0.05, 0.05]),
        Candidate::preset("chart_heavy",     [0.20, 0.10, 0.45, 0.15, 0.05, 0.05]),
        Candidate::preset("rl_focused",      [0.20, 0.35, 0.25, 0.10, 0.05, 0.05]),
        Candidate::preset("ai_heavy",        [0.15, 0.10, 0.35, 0.30, 0.05, 0.05]),
        Candidate::preset("balanced",        [0.30, 0.20, 0.25, 0.15, 0.05, 0.05]),
    ]
}

// ─── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankBy {
    #[default]
    Roi,
    Sharpe,
}

impl RankBy {
    fn key(self, m: &Metrics) -> f64 {
        match self {
            RankBy::Roi    => m.roi,
            RankBy::Sharpe => m.sharpe_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRow {
    /// 1-based rank; `None` for errored rows.
    pub rank:              Option<usize>,
    /// Position in the submitted candidate list.
    pub index:             usize,
    pub name:              String,
    pub weights:           WeightMap,
    pub metrics:           Option<Metrics>,
    pub final_equity:      Option<f64>,
    pub insufficient_data: bool,
    pub error:             Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub ranked_by:      RankBy,
    pub rows:           Vec<OptimizationRow>,
    pub best_by_roi:    Option<OptimizationRow>,
    pub best_by_sharpe: Option<OptimizationRow>,
}

/// One flat CSV line.
#[derive(Serialize)]
struct CsvRow<'a> {
    rank:             Option<usize>,
    name:             &'a str,
    technical:        f64,
    rl:               f64,
    chart_analysis:   f64,
    multi_agent:      f64,
    market_context:   f64,
    sentiment:        f64,
    roi:              Option<f64>,
    win_rate:         Option<f64>,
    total_trades:     Option<usize>,
    profit_factor:    Option<f64>,
    max_drawdown_pct: Option<f64>,
    sharpe_ratio:     Option<f64>,
    final_equity:     Option<f64>,
    error:            Option<&'a str>,
}

impl OptimizationReport {
    pub fn to_csv(&self) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            let m = row.metrics.as_ref();
            writer
                .serialize(CsvRow {
                    rank:             row.rank,
                    name:             &row.name,
                    technical:        row.weights.get(SignalSource::Technical),
                    rl:               row.weights.get(SignalSource::Rl),
                    chart_analysis:   row.weights.get(SignalSource::ChartAnalysis),
                    multi_agent:      row.weights.get(SignalSource::MultiAgent),
                    market_context:   row.weights.get(SignalSource::MarketContext),
                    sentiment:        row.weights.get(SignalSource::Sentiment),
                    roi:              m.map(|m| m.roi),
                    win_rate:         m.map(|m| m.win_rate),
                    total_trades:     m.map(|m| m.total_trades),
                    profit_factor:    m.map(|m| m.profit_factor),
                    max_drawdown_pct: m.map(|m| m.max_drawdown_pct),
                    sharpe_ratio:     m.map(|m| m.sharpe_ratio),
                    final_equity:     row.final_equity,
                    error:            row.error.as_deref(),
                })
                .context("failed to write optimization row")?;
        }
        let bytes = writer.into_inner().context("failed to flush CSV writer")?;
        String::from_utf8(bytes).context("CSV output was not UTF-8")
    }
}

// ─── Sweep ────────────────────────────────────────────────────────────────────

pub fn run_weight_optimization(
    base:       &BacktestConfigInput,
    candidates: &[Candidate],
    ticks:      &[ReplayTick],
    rank_by:    RankBy,
) -> OptimizationReport {
    info!(candidates = candidates.len(), ticks = ticks.len(), ?rank_by, "🔬 Weight sweep started");

    let mut rows: Vec<OptimizationRow> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, candidate)| evaluate(index, candidate, base, ticks))
        .collect();

    let best_by_roi = best(&rows, RankBy::Roi);
    let best_by_sharpe = best(&rows, RankBy::Sharpe);

    // rows arrive in index order; a stable sort keeps that order for ties
    rows.sort_by(|a, b| match (&a.metrics, &b.metrics) {
        (Some(ma), Some(mb)) => rank_by.key(mb).total_cmp(&rank_by.key(ma)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    let mut rank = 0;
    for row in rows.iter_mut().filter(|r| r.metrics.is_some()) {
        rank += 1;
        row.rank = Some(rank);
    }

    let with_rank = |best: Option<OptimizationRow>| {
        best.and_then(|b| rows.iter().find(|r| r.index == b.index).cloned())
    };
    let best_by_roi = with_rank(best_by_roi);
    let best_by_sharpe = with_rank(best_by_sharpe);

    if let Some(top) = &best_by_roi {
        info!(name = %top.name, roi = ?top.metrics.as_ref().map(|m| m.roi), "🏆 Best weights by ROI");
    }

    OptimizationReport { ranked_by: rank_by, rows, best_by_roi, best_by_sharpe }
}

fn evaluate(
    index:     usize,
    candidate: &Candidate,
    base:      &BacktestConfigInput,
    ticks:     &[ReplayTick],
) -> OptimizationRow {
    let input = BacktestConfigInput {
        weights: candidate.weights.clone(),
        ..base.clone()
    };
    let mut row = OptimizationRow {
        rank:              None,
        index,
        name:              candidate.name.clone(),
        weights:           candidate.weights.clone(),
        metrics:           None,
        final_equity:      None,
        insufficient_data: false,
        error:             None,
    };

    match BacktestConfig::new(input) {
        Ok(config) => {
            let result = run_backtest(&config, ticks);
            row.metrics           = Some(result.metrics);
            row.final_equity      = Some(result.final_equity);
            row.insufficient_data = result.insufficient_data;
        }
        Err(err) => {
            warn!(name = %candidate.name, %err, "Candidate rejected");
            row.error = Some(err.to_string());
        }
    }
    row
}

/// Highest key among successful rows; earliest index wins ties.
fn best(rows: &[OptimizationRow], by: RankBy) -> Option<OptimizationRow> {
    rows.iter()
        .filter_map(|r| r.metrics.as_ref().map(|m| (by.key(m), r)))
        .fold(None::<(f64, &OptimizationRow)>, |acc, (key, row)| match acc {
            Some((k, _)) if key <= k => acc,
            _ => Some((key, row)),
        })
        .map(|(_, row)| row.clone())
}
