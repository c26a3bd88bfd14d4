//! # engine::aggregator — Unified Signal
//!
//! Combines per-source sub-scores into one 0–10 score, a BUY/SELL/HOLD
//! action and a 0–100 confidence.
//!
//! ## Pipeline
//! 1. keep present, finite, in-range scores with a positive weight
//! 2. unified = Σ(score·w) / Σw over those sources
//! 3. confidence = 100 · (1 − σ_w / 5)
//! 4. breaker gate → thresholds → confidence gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::env_f64;
use crate::error::ValidationError;
use crate::models::{Action, SignalRecord, SourceScores, WeightMap};

/// Score reported when no weighted source is present.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Largest possible standard deviation of values on [0, 10].
const MAX_SIGMA: f64 = 5.0;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub buy_threshold:  f64,
    pub sell_threshold: f64,
    pub min_confidence: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            buy_threshold:  6.5,
            sell_threshold: 3.5,
            min_confidence: 55.0,
        }
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            buy_threshold:  env_f64("BUY_THRESHOLD", d.buy_threshold),
            sell_threshold: env_f64("SELL_THRESHOLD", d.sell_threshold),
            min_confidence: env_f64("MIN_CONFIDENCE", d.min_confidence),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("buy_threshold", self.buy_threshold, 0.0, 10.0)?;
        ValidationError::check_range("sell_threshold", self.sell_threshold, 0.0, 10.0)?;
        ValidationError::check_range("min_confidence", self.min_confidence, 0.0, 100.0)?;
        if self.buy_threshold <= self.sell_threshold {
            return Err(ValidationError::InvertedThresholds {
                buy:  self.buy_threshold,
                sell: self.sell_threshold,
            });
        }
        Ok(())
    }
}

// ─── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateSignal {
    pub unified_score:    f64,
    pub action:           Action,
    pub confidence:       f64,
    /// Sources that actually contributed.
    pub sources_used:     usize,
    /// `true` when a directional score was forced to HOLD by the breaker.
    pub gated_by_breaker: bool,
}

// ─── Aggregator ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn compute(
        &self,
        sources:              &SourceScores,
        weights:              &WeightMap,
        circuit_breaker_safe: bool,
    ) -> AggregateSignal {
        let present: Vec<(f64, f64)> = sources
            .present()
            .filter(|(_, score)| score.is_finite() && (0.0..=10.0).contains(score))
            .map(|(source, score)| (score, weights.get(source)))
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();

        let total_weight: f64 = present.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return AggregateSignal {
                unified_score:    NEUTRAL_SCORE,
                action:           Action::Hold,
                confidence:       0.0,
                sources_used:     0,
                gated_by_breaker: false,
            };
        }

        let unified = (present.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight).clamp(0.0, 10.0);
        let variance = present
            .iter()
            .map(|(s, w)| w * (s - unified).powi(2))
            .sum::<f64>()
            / total_weight;
        let confidence = (100.0 * (1.0 - variance.sqrt() / MAX_SIGMA)).clamp(0.0, 100.0);

        let raw = self.classify(unified);
        let gated_by_breaker = !circuit_breaker_safe && raw.is_directional();
        let action = if !circuit_breaker_safe {
            Action::Hold
        } else if raw.is_directional() && confidence < self.config.min_confidence {
            debug!(unified, confidence, "Low confidence, {raw} downgraded to HOLD");
            Action::Hold
        } else {
            raw
        };

        AggregateSignal {
            unified_score: unified,
            action,
            confidence,
            sources_used: present.len(),
            gated_by_breaker,
        }
    }

    /// Threshold partition: BUY ≥ buy, SELL ≤ sell, HOLD otherwise.
    pub fn classify(&self, score: f64) -> Action {
        if score >= self.config.buy_threshold {
            Action::Buy
        } else if score <= self.config.sell_threshold {
            Action::Sell
        } else {
            Action::Hold
        }
    }

    /// Computes and wraps the result in an immutable [`SignalRecord`].
    pub fn record(
        &self,
        timestamp:            DateTime<Utc>,
        symbol:               &str,
        price:                f64,
        sources:              SourceScores,
        weights:              &WeightMap,
        circuit_breaker_safe: bool,
    ) -> SignalRecord {
        let out = self.compute(&sources, weights, circuit_breaker_safe);
        SignalRecord {
            timestamp,
            symbol:        symbol.to_string(),
            price,
            sources,
            weights:       weights.clone(),
            unified_score: out.unified_score,
            action:        out.action,
            confidence:    out.confidence,
        }
    }

    /// Rescores a recorded signal under different weights, keeping its
    /// timestamp, price and raw sub-scores.
    pub fn rescore(&self, signal: &SignalRecord, weights: &WeightMap) -> SignalRecord {
        self.record(signal.timestamp, &signal.symbol, signal.price, signal.sources, weights, true)
    }
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self { config: AggregatorConfig::default() }
    }
}
