//! Tick sources for replay.  A [`TickFeed`] yields signals paired with the
//! market snapshot observed at the same instant; [`replay_feed`] runs the
//! snapshots through a private breaker so historical data produces the same
//! breaker states the live engine would have seen.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, BreakerCore};
use crate::engine::book::ReplayTick;
use crate::models::{MarketSnapshot, SignalRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTick {
    #[serde(default)]
    pub snapshot: Option<MarketSnapshot>,
    pub signal:   SignalRecord,
    #[serde(default)]
    pub paused:   bool,
}

pub trait TickFeed {
    fn next_tick(&mut self) -> Option<FeedTick>;
}

/// In-memory feed over recorded ticks, in timestamp order.
#[derive(Debug, Clone, Default)]
pub struct HistoricalFeed {
    ticks:  Vec<FeedTick>,
    cursor: usize,
}

impl HistoricalFeed {
    pub fn new(mut ticks: Vec<FeedTick>) -> Self {
        ticks.sort_by_key(|t| t.signal.timestamp);
        Self { ticks, cursor: 0 }
    }

    /// Loads a JSON array of [`FeedTick`] from disk.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed file {}", path.display()))?;
        let ticks: Vec<FeedTick> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse feed file {}", path.display()))?;
        Ok(Self::new(ticks))
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl TickFeed for HistoricalFeed {
    fn next_tick(&mut self) -> Option<FeedTick> {
        let tick = self.ticks.get(self.cursor).cloned();
        if tick.is_some() {
            self.cursor += 1;
        }
        tick
    }
}

/// Drains `feed`, tagging each signal with the breaker state after its
/// snapshot (or the carried-over state when the tick has none).
pub fn replay_feed<F: TickFeed>(feed: &mut F, breaker: BreakerConfig) -> Vec<ReplayTick> {
    let mut core = BreakerCore::new(breaker);
    let mut out = Vec::new();
    while let Some(tick) = feed.next_tick() {
        let breaker_state = match &tick.snapshot {
            Some(snapshot) => core.evaluate(snapshot).state,
            None => core.state(),
        };
        out.push(ReplayTick {
            signal: tick.signal,
            breaker_state,
            paused: tick.paused,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::models::Action;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn feed_tick(minute: i64, btc_1h: Option<f64>) -> FeedTick {
        FeedTick {
            snapshot: btc_1h.map(|c| {
                let mut s = MarketSnapshot::nominal(ts(minute));
                s.btc.change_1h = Some(c);
                s
            }),
            signal: SignalRecord {
                timestamp:     ts(minute),
                symbol:        "SUIUSDC".into(),
                price:         1.5,
                sources:       Default::default(),
                weights:       Default::default(),
                unified_score: 7.0,
                action:        Action::Buy,
                confidence:    90.0,
            },
            paused: false,
        }
    }

    #[test]
    fn breaker_states_follow_snapshots() {
        let mut feed = HistoricalFeed::new(vec![
            feed_tick(2, None),
            feed_tick(0, Some(0.5)),
            feed_tick(1, Some(-18.0)),
        ]);
        let ticks = replay_feed(&mut feed, BreakerConfig::default());
        let states: Vec<_> = ticks.iter().map(|t| t.breaker_state).collect();
        assert_eq!(
            states,
            vec![BreakerState::Safe, BreakerState::Triggered, BreakerState::Triggered]
        );
        assert!(feed.next_tick().is_none());
    }

    #[test]
    fn feed_file_round_trip() {
        let path = std::env::temp_dir().join(format!("tradegate-feed-{}.json", uuid::Uuid::new_v4()));
        let ticks = vec![feed_tick(0, Some(0.1)), feed_tick(1, None)];
        std::fs::write(&path, serde_json::to_string(&ticks).unwrap()).unwrap();

        let feed = HistoricalFeed::load(&path).unwrap();
        assert_eq!(feed.len(), 2);
        std::fs::remove_file(&path).ok();

        assert!(HistoricalFeed::load(&path).is_err());
    }
}
