//! # models::snapshot
//!
//! Defines [`MarketSnapshot`], the market-wide pulse the circuit breaker
//! evaluates on every monitor tick.
//!
//! A snapshot is recorded once and never mutated afterwards.  Every optional
//! field is optional because real feeds drop them from time to time; the
//! breaker treats a missing value as "unknown", never as "calm".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── AssetMove ────────────────────────────────────────────────────────────────

/// Price and percent change of one benchmark asset over the fixed windows.
///
/// Changes are signed percentages: `-17.5` means the asset fell 17.5 %.
/// A window the feed did not report stays `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetMove {
    pub price:      f64,
    #[serde(default)]
    pub change_5m:  Option<f64>,
    #[serde(default)]
    pub change_1h:  Option<f64>,
    #[serde(default)]
    pub change_4h:  Option<f64>,
}

impl AssetMove {
    /// All three windows reported.
    pub fn has_changes(&self) -> bool {
        self.change_5m.is_some() && self.change_1h.is_some() && self.change_4h.is_some()
    }

    /// The deepest of the reported window changes, or 0 when none is negative.
    pub fn worst_change(&self) -> f64 {
        [self.change_5m, self.change_1h, self.change_4h]
            .into_iter()
            .flatten()
            .fold(0.0, f64::min)
    }

    /// Price before the deepest recorded drop, e.g. 90 after -10 % ⇒ 100.
    pub fn pre_drop_price(&self) -> f64 {
        let worst = self.worst_change();
        if worst <= -100.0 {
            return self.price;
        }
        self.price / (1.0 + worst / 100.0)
    }
}

// ─── MarketSnapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// UTC time the snapshot was taken.  The breaker measures every
    /// stabilization window against these timestamps, not the wall clock.
    pub timestamp: DateTime<Utc>,

    pub btc: AssetMove,
    pub eth: AssetMove,

    /// Aggregate liquidations over the last hour, in USD.
    #[serde(default)]
    pub liquidations_1h: Option<f64>,

    /// Total crypto market-cap percent change over 4 hours.
    #[serde(default)]
    pub market_cap_change_4h: Option<f64>,

    /// Traded volume over the last hour (quote currency).
    #[serde(default)]
    pub volume_1h: Option<f64>,

    /// Trailing average of `volume_1h`, as computed by the data collaborator.
    #[serde(default)]
    pub volume_avg_1h: Option<f64>,
}

impl MarketSnapshot {
    /// Current volume as a fraction of its trailing average.
    pub fn volume_ratio(&self) -> Option<f64> {
        match (self.volume_1h, self.volume_avg_1h) {
            (Some(v), Some(avg)) if avg > 0.0 => Some(v / avg),
            _ => None,
        }
    }

    /// Worst 1-hour move across the benchmark assets; `None` unless both
    /// assets reported it.
    pub fn worst_change_1h(&self) -> Option<f64> {
        Some(self.btc.change_1h?.min(self.eth.change_1h?))
    }

    /// Every benchmark window change is present.
    pub fn has_window_changes(&self) -> bool {
        self.btc.has_changes() && self.eth.has_changes()
    }

    /// A quiet snapshot used by tests across the crate.
    #[cfg(test)]
    pub fn nominal(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            btc: AssetMove { price: 60_000.0, change_5m: Some(0.1), change_1h: Some(0.4), change_4h: Some(1.2) },
            eth: AssetMove { price: 3_000.0, change_5m: Some(0.2), change_1h: Some(0.3), change_4h: Some(0.9) },
            liquidations_1h:      Some(40_000_000.0),
            market_cap_change_4h: Some(0.8),
            volume_1h:            Some(1_000.0),
            volume_avg_1h:        Some(1_000.0),
        }
    }
}
