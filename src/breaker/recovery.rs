//! # breaker::recovery
//!
//! Automatic recovery conditions, all of which must hold:
//!
//! 1. ≥ 30 min since the trigger and ≥ 30 min of uninterrupted
//!    stabilization (no > 5 % 1h drop on BTC or ETH)
//! 2. liquidations < $100M / hour
//! 3. BTC regained ≥ 50 % of the pre-crash → trough drawdown
//! 4. last-hour volume ≥ 70 % of its trailing average
//!
//! A condition with missing data is unmet.  A snapshot without the 1h
//! benchmark changes cannot prove calm, so it restarts the window just like
//! a renewed drop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::env_f64;
use crate::models::MarketSnapshot;

// ─── Thresholds ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryThresholds {
    pub stabilization_minutes:     f64,
    /// A 1h drop larger than this (percent) restarts the window.
    pub max_drop_during_recovery:  f64,
    pub max_liquidations_1h_usd:   f64,
    pub min_price_recovery_ratio:  f64,
    pub min_volume_ratio:          f64,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            stabilization_minutes:    30.0,
            max_drop_during_recovery: 5.0,
            max_liquidations_1h_usd:  100_000_000.0,
            min_price_recovery_ratio: 0.5,
            min_volume_ratio:         0.7,
        }
    }
}

impl RecoveryThresholds {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stabilization_minutes:    env_f64("CB_STABILIZATION_MINUTES", d.stabilization_minutes),
            max_drop_during_recovery: env_f64("CB_RECOVERY_MAX_DROP_PCT", d.max_drop_during_recovery),
            max_liquidations_1h_usd:  env_f64("CB_RECOVERY_MAX_LIQUIDATIONS_USD", d.max_liquidations_1h_usd),
            min_price_recovery_ratio: env_f64("CB_RECOVERY_MIN_PRICE_RATIO", d.min_price_recovery_ratio),
            min_volume_ratio:         env_f64("CB_RECOVERY_MIN_VOLUME_RATIO", d.min_volume_ratio),
        }
    }
}

// ─── Progress ─────────────────────────────────────────────────────────────────

/// Post-trigger bookkeeping owned by the breaker core.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryProgress {
    /// First calm snapshot after the trigger; `None` until then and again
    /// after every disqualifying drop.
    pub window_started_at: Option<DateTime<Utc>>,
    /// BTC price before the crash move.
    pub reference_price:   Option<f64>,
    /// Lowest BTC price observed since the trigger.
    pub trough_price:      Option<f64>,
}

impl RecoveryProgress {
    pub fn starting_from(snapshot: Option<&MarketSnapshot>) -> Self {
        Self {
            window_started_at: None,
            reference_price:   snapshot.map(|s| s.btc.pre_drop_price()),
            trough_price:      snapshot.map(|s| s.btc.price),
        }
    }

    /// Folds a post-trigger BTC price into the reference / trough pair.
    pub fn observe(&mut self, snapshot: &MarketSnapshot) {
        let price = snapshot.btc.price;
        if self.reference_price.is_none() {
            self.reference_price = Some(snapshot.btc.pre_drop_price());
        }
        self.trough_price = Some(match self.trough_price {
            Some(low) => low.min(price),
            None => price,
        });
    }

    /// Fraction of the drawdown regained at `price`.  A zero drawdown counts
    /// as fully recovered.
    pub fn price_recovery(&self, price: f64) -> Option<f64> {
        let (reference, trough) = (self.reference_price?, self.trough_price?);
        let drawdown = reference - trough;
        if drawdown <= 0.0 {
            return Some(1.0);
        }
        Some((price - trough) / drawdown)
    }
}

// ─── Assessment ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryCondition {
    Stabilization,
    Liquidations,
    PriceRecovery,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAssessment {
    pub assessed_at:             DateTime<Utc>,
    pub minutes_since_trigger:   f64,
    pub stabilized_minutes:      Option<f64>,
    pub liquidations_1h:         Option<f64>,
    pub price_recovery_ratio:    Option<f64>,
    pub volume_ratio:            Option<f64>,
    pub unmet:                   Vec<RecoveryCondition>,
}

impl RecoveryAssessment {
    pub fn all_met(&self) -> bool {
        self.unmet.is_empty()
    }
}

pub fn assess(
    progress:     &RecoveryProgress,
    triggered_at: DateTime<Utc>,
    snapshot:     &MarketSnapshot,
    t:            &RecoveryThresholds,
) -> RecoveryAssessment {
    let now = snapshot.timestamp;
    let minutes_since_trigger = minutes_between(triggered_at, now);
    let stabilized_minutes = progress.window_started_at.map(|start| minutes_between(start, now));
    let price_recovery_ratio = progress.price_recovery(snapshot.btc.price);
    let volume_ratio = snapshot.volume_ratio();

    let mut unmet = Vec::new();

    let stabilized = minutes_since_trigger >= t.stabilization_minutes
        && stabilized_minutes.is_some_and(|m| m >= t.stabilization_minutes);
    if !stabilized {
        unmet.push(RecoveryCondition::Stabilization);
    }
    if !snapshot.liquidations_1h.is_some_and(|l| l < t.max_liquidations_1h_usd) {
        unmet.push(RecoveryCondition::Liquidations);
    }
    if !price_recovery_ratio.is_some_and(|r| r >= t.min_price_recovery_ratio) {
        unmet.push(RecoveryCondition::PriceRecovery);
    }
    if !volume_ratio.is_some_and(|v| v >= t.min_volume_ratio) {
        unmet.push(RecoveryCondition::Volume);
    }

    RecoveryAssessment {
        assessed_at: now,
        minutes_since_trigger,
        stabilized_minutes,
        liquidations_1h: snapshot.liquidations_1h,
        price_recovery_ratio,
        volume_ratio,
        unmet,
    }
}

/// How one post-trigger snapshot bears on the stabilization window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Calm,
    /// A 1h drop beyond `max_drop_during_recovery`.
    RenewedDrop,
    /// BTC or ETH 1h change missing.
    Unknown,
}

pub fn stability(snapshot: &MarketSnapshot, t: &RecoveryThresholds) -> Stability {
    match snapshot.worst_change_1h() {
        None => Stability::Unknown,
        Some(change) if change < -t.max_drop_during_recovery => Stability::RenewedDrop,
        Some(_) => Stability::Calm,
    }
}

pub(crate) fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn progress() -> RecoveryProgress {
        RecoveryProgress {
            window_started_at: Some(t0() + Duration::minutes(1)),
            reference_price:   Some(100.0),
            trough_price:      Some(80.0),
        }
    }

    fn calm_at(minutes: i64, btc_price: f64) -> MarketSnapshot {
        let mut s = MarketSnapshot::nominal(t0() + Duration::minutes(minutes));
        s.btc.price = btc_price;
        s
    }

    #[test]
    fn all_conditions_met() {
        let a = assess(&progress(), t0(), &calm_at(40, 92.0), &RecoveryThresholds::default());
        assert!(a.all_met(), "unmet: {:?}", a.unmet);
        assert!((a.price_recovery_ratio.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn window_too_short() {
        let a = assess(&progress(), t0(), &calm_at(20, 95.0), &RecoveryThresholds::default());
        assert_eq!(a.unmet, vec![RecoveryCondition::Stabilization]);
    }

    #[test]
    fn missing_data_is_unmet() {
        let mut s = calm_at(45, 95.0);
        s.liquidations_1h = None;
        s.volume_avg_1h = None;
        let a = assess(&progress(), t0(), &s, &RecoveryThresholds::default());
        assert_eq!(
            a.unmet,
            vec![RecoveryCondition::Liquidations, RecoveryCondition::Volume]
        );
    }

    #[test]
    fn weak_bounce_blocks_recovery() {
        let a = assess(&progress(), t0(), &calm_at(45, 85.0), &RecoveryThresholds::default());
        assert_eq!(a.unmet, vec![RecoveryCondition::PriceRecovery]);
    }

    #[test]
    fn trough_tracks_lowest_price() {
        let mut p = RecoveryProgress::default();
        p.observe(&calm_at(1, 90.0));
        p.observe(&calm_at(2, 85.0));
        p.observe(&calm_at(3, 88.0));
        assert_eq!(p.trough_price, Some(85.0));
    }

    #[test]
    fn five_percent_hourly_drop_disqualifies() {
        let mut s = calm_at(10, 90.0);
        s.eth.change_1h = Some(-5.5);
        assert_eq!(stability(&s, &RecoveryThresholds::default()), Stability::RenewedDrop);
        s.eth.change_1h = Some(-5.0);
        assert_eq!(stability(&s, &RecoveryThresholds::default()), Stability::Calm);
    }

    #[test]
    fn missing_hourly_change_is_not_calm() {
        let mut s = calm_at(10, 90.0);
        s.btc.change_1h = None;
        assert_eq!(stability(&s, &RecoveryThresholds::default()), Stability::Unknown);
    }

    #[test]
    fn heavy_liquidations_block_recovery() {
        let t = RecoveryThresholds::default();
        let mut s = calm_at(45, 95.0);
        s.liquidations_1h = Some(100_000_000.0);
        let a = assess(&progress(), t0(), &s, &t);
        assert_eq!(a.unmet, vec![RecoveryCondition::Liquidations]);

        s.liquidations_1h = Some(99_999_999.0);
        assert!(assess(&progress(), t0(), &s, &t).all_met());
    }
}
