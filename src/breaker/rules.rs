//! # breaker::rules
//!
//! The fixed, ordered list of crash rules.
//!
//! ```text
//!  #  Rule                          Threshold
//!  1  BTC 1h drop                   > 15 %
//!  2  BTC 4h drop                   > 20 %
//!  3  BTC 5m flash crash            > 10 %
//!  4  ETH 1h drop                   > 15 %
//!  5  ETH 4h drop                   > 25 %
//!  6  ETH 5m flash crash            > 12 %
//!  7  Total market-cap 4h drop      > 20 %
//!  8  Liquidations (1h)             > $500M
//! ```
//!
//! Rules are independent; the first satisfied rule in this order supplies
//! the trigger reason.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::env_f64;
use crate::models::MarketSnapshot;

// ─── Thresholds ───────────────────────────────────────────────────────────────

/// Drop thresholds are positive percentages; a rule fires when the observed
/// change is strictly below the negated threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrashThresholds {
    pub btc_drop_1h_pct:        f64,
    pub btc_drop_4h_pct:        f64,
    pub btc_drop_5m_pct:        f64,
    pub eth_drop_1h_pct:        f64,
    pub eth_drop_4h_pct:        f64,
    pub eth_drop_5m_pct:        f64,
    pub market_cap_drop_4h_pct: f64,
    pub liquidations_1h_usd:    f64,
    /// Fraction of any threshold at which the breaker raises WARNING.
    pub warning_ratio:          f64,
}

impl Default for CrashThresholds {
    fn default() -> Self {
        Self {
            btc_drop_1h_pct:        15.0,
            btc_drop_4h_pct:        20.0,
            btc_drop_5m_pct:        10.0,
            eth_drop_1h_pct:        15.0,
            eth_drop_4h_pct:        25.0,
            eth_drop_5m_pct:        12.0,
            market_cap_drop_4h_pct: 20.0,
            liquidations_1h_usd:    500_000_000.0,
            warning_ratio:          0.75,
        }
    }
}

impl CrashThresholds {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            btc_drop_1h_pct:        env_f64("CB_BTC_DROP_1H_PCT", d.btc_drop_1h_pct),
            btc_drop_4h_pct:        env_f64("CB_BTC_DROP_4H_PCT", d.btc_drop_4h_pct),
            btc_drop_5m_pct:        env_f64("CB_BTC_DROP_5M_PCT", d.btc_drop_5m_pct),
            eth_drop_1h_pct:        env_f64("CB_ETH_DROP_1H_PCT", d.eth_drop_1h_pct),
            eth_drop_4h_pct:        env_f64("CB_ETH_DROP_4H_PCT", d.eth_drop_4h_pct),
            eth_drop_5m_pct:        env_f64("CB_ETH_DROP_5M_PCT", d.eth_drop_5m_pct),
            market_cap_drop_4h_pct: env_f64("CB_MCAP_DROP_4H_PCT", d.market_cap_drop_4h_pct),
            liquidations_1h_usd:    env_f64("CB_LIQUIDATIONS_1H_USD", d.liquidations_1h_usd),
            warning_ratio:          env_f64("CB_WARNING_RATIO", d.warning_ratio),
        }
    }
}

// ─── CrashRule ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrashRule {
    BtcDrop1h,
    BtcDrop4h,
    BtcFlashCrash5m,
    EthDrop1h,
    EthDrop4h,
    EthFlashCrash5m,
    MarketCapDrop4h,
    Liquidations1h,
}

impl CrashRule {
    /// Priority order used by [`check_crash_conditions`].
    pub const ORDER: [CrashRule; 8] = [
        CrashRule::BtcDrop1h,
        CrashRule::BtcDrop4h,
        CrashRule::BtcFlashCrash5m,
        CrashRule::EthDrop1h,
        CrashRule::EthDrop4h,
        CrashRule::EthFlashCrash5m,
        CrashRule::MarketCapDrop4h,
        CrashRule::Liquidations1h,
    ];

    fn threshold(self, t: &CrashThresholds) -> f64 {
        match self {
            CrashRule::BtcDrop1h       => t.btc_drop_1h_pct,
            CrashRule::BtcDrop4h       => t.btc_drop_4h_pct,
            CrashRule::BtcFlashCrash5m => t.btc_drop_5m_pct,
            CrashRule::EthDrop1h       => t.eth_drop_1h_pct,
            CrashRule::EthDrop4h       => t.eth_drop_4h_pct,
            CrashRule::EthFlashCrash5m => t.eth_drop_5m_pct,
            CrashRule::MarketCapDrop4h => t.market_cap_drop_4h_pct,
            CrashRule::Liquidations1h  => t.liquidations_1h_usd,
        }
    }

    /// Magnitude this rule compares against its threshold: the size of the
    /// drop (positive when falling) or the liquidation volume.  `None` when
    /// the snapshot does not carry the field.
    fn magnitude(self, s: &MarketSnapshot) -> Option<f64> {
        match self {
            CrashRule::BtcDrop1h       => s.btc.change_1h.map(|c| -c),
            CrashRule::BtcDrop4h       => s.btc.change_4h.map(|c| -c),
            CrashRule::BtcFlashCrash5m => s.btc.change_5m.map(|c| -c),
            CrashRule::EthDrop1h       => s.eth.change_1h.map(|c| -c),
            CrashRule::EthDrop4h       => s.eth.change_4h.map(|c| -c),
            CrashRule::EthFlashCrash5m => s.eth.change_5m.map(|c| -c),
            CrashRule::MarketCapDrop4h => s.market_cap_change_4h.map(|c| -c),
            CrashRule::Liquidations1h  => s.liquidations_1h,
        }
    }
}

// ─── TriggerReason ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    /// A crash rule fired.  `observed` is the drop magnitude in percent, or
    /// USD for liquidations.
    Crash {
        rule:      CrashRule,
        observed:  f64,
        threshold: f64,
    },
    /// An operator or collaborator called `trigger` directly.
    Manual { note: String },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rule, observed, threshold) = match self {
            TriggerReason::Manual { note } => return write!(f, "Manual trigger: {note}"),
            TriggerReason::Crash { rule, observed, threshold } => (*rule, *observed, *threshold),
        };
        match rule {
            CrashRule::BtcDrop1h => write!(f, "BTC dropped {observed:.1}% in 1 hour (threshold: {threshold}%)"),
            CrashRule::BtcDrop4h => write!(f, "BTC dropped {observed:.1}% in 4 hours (threshold: {threshold}%)"),
            CrashRule::BtcFlashCrash5m => write!(f, "BTC flash crash {observed:.1}% in 5 minutes (threshold: {threshold}%)"),
            CrashRule::EthDrop1h => write!(f, "ETH dropped {observed:.1}% in 1 hour (threshold: {threshold}%)"),
            CrashRule::EthDrop4h => write!(f, "ETH dropped {observed:.1}% in 4 hours (threshold: {threshold}%)"),
            CrashRule::EthFlashCrash5m => write!(f, "ETH flash crash {observed:.1}% in 5 minutes (threshold: {threshold}%)"),
            CrashRule::MarketCapDrop4h => write!(f, "Total market cap dropped {observed:.1}% in 4 hours (threshold: {threshold}%)"),
            CrashRule::Liquidations1h => write!(
                f,
                "Liquidations ${:.0}M in 1 hour (threshold: ${:.0}M)",
                observed / 1e6,
                threshold / 1e6
            ),
        }
    }
}

// ─── Checks ───────────────────────────────────────────────────────────────────

/// Outcome of [`check_crash_conditions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashCheck {
    pub should_trigger: bool,
    pub reason:         Option<TriggerReason>,
    pub message:        Option<String>,
}

/// Evaluates the rules in priority order; first match wins.
pub fn check_crash_conditions(snapshot: &MarketSnapshot, thresholds: &CrashThresholds) -> CrashCheck {
    let hit = CrashRule::ORDER.into_iter().find_map(|rule| {
        let threshold = rule.threshold(thresholds);
        rule.magnitude(snapshot)
            .filter(|observed| *observed > threshold)
            .map(|observed| TriggerReason::Crash { rule, observed, threshold })
    });

    CrashCheck {
        should_trigger: hit.is_some(),
        message:        hit.as_ref().map(ToString::to_string),
        reason:         hit,
    }
}

/// First rule whose magnitude reached `warning_ratio` of its threshold.
pub fn near_threshold(snapshot: &MarketSnapshot, thresholds: &CrashThresholds) -> Option<CrashRule> {
    CrashRule::ORDER.into_iter().find(|rule| {
        let limit = rule.threshold(thresholds) * thresholds.warning_ratio;
        rule.magnitude(snapshot).is_some_and(|observed| observed >= limit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap() -> MarketSnapshot {
        MarketSnapshot::nominal(Utc::now())
    }

    #[test]
    fn btc_one_hour_drop_wins_over_eth() {
        let mut s = snap();
        s.btc.change_1h = Some(-17.5);
        s.eth.change_1h = Some(-16.0);

        let check = check_crash_conditions(&s, &CrashThresholds::default());
        assert!(check.should_trigger);
        assert_eq!(
            check.reason,
            Some(TriggerReason::Crash { rule: CrashRule::BtcDrop1h, observed: 17.5, threshold: 15.0 })
        );
        assert!(check.message.unwrap().starts_with("BTC dropped 17.5% in 1 hour"));
    }

    #[test]
    fn moderate_dip_does_not_trigger() {
        let mut s = snap();
        s.btc.change_1h = Some(-5.0);
        s.eth.change_1h = Some(-3.0);

        let check = check_crash_conditions(&s, &CrashThresholds::default());
        assert!(!check.should_trigger);
        assert_eq!(check.reason, None);
    }

    #[test]
    fn exact_threshold_is_not_a_crash() {
        let mut s = snap();
        s.btc.change_1h = Some(-15.0);
        assert!(!check_crash_conditions(&s, &CrashThresholds::default()).should_trigger);
    }

    #[test]
    fn rallies_never_trigger() {
        let mut s = snap();
        s.btc.change_1h = Some(25.0);
        s.eth.change_4h = Some(40.0);
        assert!(!check_crash_conditions(&s, &CrashThresholds::default()).should_trigger);
    }

    #[test]
    fn priority_order_prefers_btc_4h_over_eth_5m() {
        let mut s = snap();
        s.eth.change_5m = Some(-13.0);
        s.btc.change_4h = Some(-21.0);
        let check = check_crash_conditions(&s, &CrashThresholds::default());
        assert!(matches!(
            check.reason,
            Some(TriggerReason::Crash { rule: CrashRule::BtcDrop4h, .. })
        ));
    }

    #[test]
    fn liquidations_rule_is_last() {
        let mut s = snap();
        s.liquidations_1h = Some(750_000_000.0);
        let check = check_crash_conditions(&s, &CrashThresholds::default());
        assert_eq!(
            check.message.as_deref(),
            Some("Liquidations $750M in 1 hour (threshold: $500M)")
        );
    }

    #[test]
    fn missing_market_cap_is_ignored() {
        let mut s = snap();
        s.market_cap_change_4h = None;
        s.liquidations_1h = None;
        assert!(!check_crash_conditions(&s, &CrashThresholds::default()).should_trigger);
    }

    #[test]
    fn missing_window_changes_never_trigger() {
        let mut s = snap();
        s.btc.change_1h = None;
        s.eth.change_5m = None;
        assert!(!check_crash_conditions(&s, &CrashThresholds::default()).should_trigger);
        assert_eq!(near_threshold(&s, &CrashThresholds::default()), None);

        s.btc.change_4h = Some(-22.0);
        assert!(matches!(
            check_crash_conditions(&s, &CrashThresholds::default()).reason,
            Some(TriggerReason::Crash { rule: CrashRule::BtcDrop4h, .. })
        ));
    }

    #[test]
    fn warning_band_starts_at_ratio() {
        let mut s = snap();
        s.btc.change_1h = Some(-11.25); // 75 % of 15
        assert_eq!(near_threshold(&s, &CrashThresholds::default()), Some(CrashRule::BtcDrop1h));
        s.btc.change_1h = Some(-11.0);
        assert_eq!(near_threshold(&s, &CrashThresholds::default()), None);
    }
}
