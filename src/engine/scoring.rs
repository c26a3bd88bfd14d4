//! # engine::scoring
//!
//! Converters from upstream collaborator opinions to the 0–10 scale the
//! aggregator consumes.  5.0 is neutral; above favours BUY, below SELL.

use serde::{Deserialize, Serialize};

use crate::models::{Action, SignalSource};

/// Directional lean reported by a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lean {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

/// Structured opinion as submitted by an upstream analysis module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceOpinion {
    Technical {
        action: Action,
        #[serde(default)]
        rsi:    Option<f64>,
        #[serde(default)]
        macd:   Option<f64>,
    },
    Rl {
        action:     Action,
        /// 0–100.
        #[serde(default)]
        confidence: f64,
    },
    ChartAnalysis {
        recommendation: Action,
        #[serde(default)]
        sentiment:      Lean,
    },
    MultiAgent {
        action: Action,
        /// Direction of a detected volume/price spike, if any.
        #[serde(default)]
        spike:  Option<Lean>,
    },
    MarketContext {
        btc_trend:   Lean,
        eth_trend:   Lean,
        /// Correlation of the traded symbol with BTC.
        #[serde(default)]
        correlation: f64,
    },
    Sentiment {
        /// -1 (very bearish) … +1 (very bullish).
        polarity: f64,
    },
}

impl SourceOpinion {
    pub fn source(&self) -> SignalSource {
        match self {
            SourceOpinion::Technical { .. }     => SignalSource::Technical,
            SourceOpinion::Rl { .. }            => SignalSource::Rl,
            SourceOpinion::ChartAnalysis { .. } => SignalSource::ChartAnalysis,
            SourceOpinion::MultiAgent { .. }    => SignalSource::MultiAgent,
            SourceOpinion::MarketContext { .. } => SignalSource::MarketContext,
            SourceOpinion::Sentiment { .. }     => SignalSource::Sentiment,
        }
    }

    pub fn score(&self) -> f64 {
        match *self {
            SourceOpinion::Technical { action, rsi, macd } => technical_score(action, rsi, macd),
            SourceOpinion::Rl { action, confidence } => rl_score(action, confidence),
            SourceOpinion::ChartAnalysis { recommendation, sentiment } => {
                chart_score(recommendation, sentiment)
            }
            SourceOpinion::MultiAgent { action, spike } => multi_agent_score(action, spike),
            SourceOpinion::MarketContext { btc_trend, eth_trend, correlation } => {
                market_context_score(btc_trend, eth_trend, correlation)
            }
            SourceOpinion::Sentiment { polarity } => sentiment_score(polarity),
        }
    }
}

fn clip(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

fn by_action(action: Action, buy: f64, sell: f64) -> f64 {
    match action {
        Action::Buy  => buy,
        Action::Sell => sell,
        Action::Hold => 5.0,
    }
}

/// Base 7 / 3 / 5; RSI oversold (< 30) +1, overbought (> 70) −1;
/// MACD sign ±0.5.
pub fn technical_score(action: Action, rsi: Option<f64>, macd: Option<f64>) -> f64 {
    let mut score = by_action(action, 7.0, 3.0);
    match rsi {
        Some(r) if r < 30.0 => score += 1.0,
        Some(r) if r > 70.0 => score -= 1.0,
        _ => {}
    }
    match macd {
        Some(m) if m > 0.0 => score += 0.5,
        Some(m) if m < 0.0 => score -= 0.5,
        _ => {}
    }
    clip(score)
}

/// Base 8 / 2 / 5, pushed further from neutral by the agent's confidence.
pub fn rl_score(action: Action, confidence: f64) -> f64 {
    let base = by_action(action, 8.0, 2.0);
    let push = if confidence > 70.0 {
        1.5
    } else if confidence > 50.0 {
        0.5
    } else {
        0.0
    };
    let signed = match action {
        Action::Buy  => push,
        Action::Sell => -push,
        Action::Hold => 0.0,
    };
    clip(base + signed)
}

pub fn chart_score(recommendation: Action, sentiment: Lean) -> f64 {
    clip(by_action(recommendation, 7.5, 2.5) + lean_bonus(sentiment, 1.0))
}

pub fn multi_agent_score(action: Action, spike: Option<Lean>) -> f64 {
    clip(by_action(action, 7.5, 2.5) + spike.map_or(0.0, |s| lean_bonus(s, 1.0)))
}

/// 6.5 when BTC and ETH agree bullish, 3.5 when they agree bearish;
/// a strongly correlated symbol (> 0.7) follows BTC by a further ±1.
pub fn market_context_score(btc: Lean, eth: Lean, correlation: f64) -> f64 {
    let mut score = match (btc, eth) {
        (Lean::Bullish, Lean::Bullish) => 6.5,
        (Lean::Bearish, Lean::Bearish) => 3.5,
        _ => 5.0,
    };
    if correlation > 0.7 {
        score += lean_bonus(btc, 1.0);
    }
    clip(score)
}

/// Linear map of polarity −1…+1 onto 0…10.
pub fn sentiment_score(polarity: f64) -> f64 {
    clip((polarity + 1.0) * 5.0)
}

fn lean_bonus(lean: Lean, amount: f64) -> f64 {
    match lean {
        Lean::Bullish => amount,
        Lean::Bearish => -amount,
        Lean::Neutral => 0.0,
    }
}
