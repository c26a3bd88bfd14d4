//! # models::signal
//!
//! Types shared by the aggregator, the simulator and the live engine:
//! the closed set of opinion sources, the structured per-source score
//! record, the weight map and the immutable [`SignalRecord`] written once
//! per evaluation tick.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ─── Action ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Action {
    /// `true` for BUY and SELL.
    pub fn is_directional(self) -> bool {
        !matches!(self, Action::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy  => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

// ─── SignalSource ─────────────────────────────────────────────────────────────

/// Every upstream collaborator that contributes a 0–10 opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Technical-indicator engine (RSI, MACD, …).
    Technical,
    /// Reinforcement-learning agent.
    Rl,
    /// Vision-based chart analyzer.
    ChartAnalysis,
    /// Multi-agent context module.
    MultiAgent,
    /// Cross-asset market context.
    MarketContext,
    /// News / social sentiment.
    Sentiment,
}

impl SignalSource {
    pub const ALL: [SignalSource; 6] = [
        SignalSource::Technical,
        SignalSource::Rl,
        SignalSource::ChartAnalysis,
        SignalSource::MultiAgent,
        SignalSource::MarketContext,
        SignalSource::Sentiment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalSource::Technical     => "technical",
            SignalSource::Rl            => "rl",
            SignalSource::ChartAnalysis => "chart_analysis",
            SignalSource::MultiAgent    => "multi_agent",
            SignalSource::MarketContext => "market_context",
            SignalSource::Sentiment     => "sentiment",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── SourceScores ─────────────────────────────────────────────────────────────

/// Per-source raw sub-scores on the 0–10 scale.  `None` = source absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceScores {
    pub technical:      Option<f64>,
    pub rl:             Option<f64>,
    pub chart_analysis: Option<f64>,
    pub multi_agent:    Option<f64>,
    pub market_context: Option<f64>,
    pub sentiment:      Option<f64>,
}

impl SourceScores {
    pub fn get(&self, source: SignalSource) -> Option<f64> {
        match source {
            SignalSource::Technical     => self.technical,
            SignalSource::Rl            => self.rl,
            SignalSource::ChartAnalysis => self.chart_analysis,
            SignalSource::MultiAgent    => self.multi_agent,
            SignalSource::MarketContext => self.market_context,
            SignalSource::Sentiment     => self.sentiment,
        }
    }

    pub fn set(&mut self, source: SignalSource, score: Option<f64>) {
        let slot = match source {
            SignalSource::Technical     => &mut self.technical,
            SignalSource::Rl            => &mut self.rl,
            SignalSource::ChartAnalysis => &mut self.chart_analysis,
            SignalSource::MultiAgent    => &mut self.multi_agent,
            SignalSource::MarketContext => &mut self.market_context,
            SignalSource::Sentiment     => &mut self.sentiment,
        };
        *slot = score;
    }

    /// Builder-style setter for test fixtures.
    #[cfg(test)]
    pub fn with(mut self, source: SignalSource, score: f64) -> Self {
        self.set(source, Some(score));
        self
    }

    /// Present sources in fixed [`SignalSource::ALL`] order.
    pub fn present(&self) -> impl Iterator<Item = (SignalSource, f64)> + '_ {
        SignalSource::ALL
            .into_iter()
            .filter_map(|s| self.get(s).map(|score| (s, score)))
    }
}

// ─── WeightMap ────────────────────────────────────────────────────────────────

/// Relative importance of each source.  Need not sum to 1; the aggregator
/// renormalises over the sources present on each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightMap(BTreeMap<SignalSource, f64>);

impl WeightMap {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (SignalSource, f64)>,
    {
        Self(pairs.into_iter().collect())
    }

    /// Weight of `source`; missing entries weigh nothing.
    pub fn get(&self, source: SignalSource) -> f64 {
        self.0.get(&source).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalSource, f64)> + '_ {
        self.0.iter().map(|(s, w)| (*s, *w))
    }

    /// Rejects negative / non-finite weights and all-zero maps.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (signal, value) in self.iter() {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidWeight { signal, value });
            }
        }
        if !self.iter().any(|(_, w)| w > 0.0) {
            return Err(ValidationError::NoPositiveWeight);
        }
        Ok(())
    }
}

impl Default for WeightMap {
    fn default() -> Self {
        Self::from_pairs([
            (SignalSource::Technical,     0.25),
            (SignalSource::Rl,            0.30),
            (SignalSource::ChartAnalysis, 0.15),
            (SignalSource::MultiAgent,    0.15),
            (SignalSource::MarketContext, 0.10),
            (SignalSource::Sentiment,     0.05),
        ])
    }
}

// ─── SignalRecord ─────────────────────────────────────────────────────────────

/// One aggregated decision for one symbol at one tick.  Never mutated after
/// creation; replays recompute a fresh record instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol:    String,
    pub price:     f64,
    #[serde(default)]
    pub sources:   SourceScores,
    #[serde(default)]
    pub weights:   WeightMap,
    #[serde(default)]
    pub unified_score: f64,
    #[serde(default)]
    pub action:        Action,
    #[serde(default)]
    pub confidence:    f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_skips_absent_sources_in_fixed_order() {
        let scores = SourceScores::default()
            .with(SignalSource::Sentiment, 4.0)
            .with(SignalSource::Technical, 8.0);
        let present: Vec<_> = scores.present().collect();
        assert_eq!(
            present,
            vec![(SignalSource::Technical, 8.0), (SignalSource::Sentiment, 4.0)]
        );
    }

    #[test]
    fn weight_map_rejects_negative_weight() {
        let weights = WeightMap::from_pairs([
            (SignalSource::Technical, 0.5),
            (SignalSource::Rl, -0.1),
        ]);
        assert_eq!(
            weights.validate(),
            Err(ValidationError::InvalidWeight { signal: SignalSource::Rl, value: -0.1 })
        );
    }

    #[test]
    fn weight_map_rejects_all_zero() {
        let weights = WeightMap::from_pairs([(SignalSource::Technical, 0.0)]);
        assert_eq!(weights.validate(), Err(ValidationError::NoPositiveWeight));
    }

    #[test]
    fn weight_map_round_trips_as_plain_json_object() {
        let json = r#"{"technical":0.6,"rl":0.4}"#;
        let weights: WeightMap = serde_json::from_str(json).unwrap();
        assert_eq!(weights.get(SignalSource::Technical), 0.6);
        assert_eq!(weights.get(SignalSource::Sentiment), 0.0);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let total: f64 = WeightMap::default().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
