//! Latest sub-score per (symbol, source), each with its own time-to-live.
//! Stale entries read back as absent so the aggregator renormalises over
//! what is still fresh.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{SignalSource, SourceScores};

/// How long a submitted score stays usable.
pub fn ttl(source: SignalSource) -> Duration {
    match source {
        SignalSource::Technical     => Duration::minutes(5),
        SignalSource::Rl            => Duration::minutes(5),
        SignalSource::ChartAnalysis => Duration::minutes(15),
        SignalSource::MultiAgent    => Duration::minutes(5),
        SignalSource::MarketContext => Duration::minutes(10),
        SignalSource::Sentiment     => Duration::minutes(60),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreEntry {
    pub score:       f64,
    pub received_at: DateTime<Utc>,
    pub fresh:       bool,
}

type Board = HashMap<String, BTreeMap<SignalSource, (f64, DateTime<Utc>)>>;

#[derive(Clone, Default)]
pub struct Scoreboard {
    inner: Arc<RwLock<Board>>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, symbol: &str, source: SignalSource, score: f64, at: DateTime<Utc>) {
        let mut board = self.inner.write().await;
        board
            .entry(symbol.to_string())
            .or_default()
            .insert(source, (score, at));
        debug!(symbol, %source, score, "Sub-score received");
    }

    /// Fresh scores for `symbol` as of `now`.
    pub async fn scores(&self, symbol: &str, now: DateTime<Utc>) -> SourceScores {
        let board = self.inner.read().await;
        let mut out = SourceScores::default();
        if let Some(entries) = board.get(symbol) {
            for (&source, &(score, at)) in entries {
                if now - at <= ttl(source) {
                    out.set(source, Some(score));
                }
            }
        }
        out
    }

    /// Everything on the board, fresh or not, for dashboards.
    pub async fn entries(&self, now: DateTime<Utc>) -> BTreeMap<String, BTreeMap<SignalSource, ScoreEntry>> {
        let board = self.inner.read().await;
        board
            .iter()
            .map(|(symbol, entries)| {
                let rows = entries
                    .iter()
                    .map(|(&source, &(score, received_at))| {
                        let fresh = now - received_at <= ttl(source);
                        (source, ScoreEntry { score, received_at, fresh })
                    })
                    .collect();
                (symbol.clone(), rows)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_scores_read_as_absent() {
        let board = Scoreboard::new();
        let t0 = Utc::now();
        board.submit("SUIUSDC", SignalSource::Technical, 7.0, t0).await;
        board.submit("SUIUSDC", SignalSource::Sentiment, 6.0, t0).await;

        let later = t0 + Duration::minutes(10);
        let scores = board.scores("SUIUSDC", later).await;
        assert_eq!(scores.technical, None);
        assert_eq!(scores.sentiment, Some(6.0));

        let entries = board.entries(later).await;
        assert!(!entries["SUIUSDC"][&SignalSource::Technical].fresh);
    }

    #[tokio::test]
    async fn newer_submission_replaces_older() {
        let board = Scoreboard::new();
        let t0 = Utc::now();
        board.submit("SUIUSDC", SignalSource::Rl, 3.0, t0).await;
        board.submit("SUIUSDC", SignalSource::Rl, 8.0, t0 + Duration::minutes(1)).await;
        assert_eq!(board.scores("SUIUSDC", t0 + Duration::minutes(2)).await.rl, Some(8.0));
        assert_eq!(board.scores("BTCUSDT", t0).await, SourceScores::default());
    }
}
