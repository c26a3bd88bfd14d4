//! Performance metrics over a closed-trade list and an equity curve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Position;

/// Profit factor reported when there were winning trades but no losses.
pub const PROFIT_FACTOR_NO_LOSSES: f64 = 999.99;

/// Annualisation factor applied to the per-trade Sharpe ratio.
const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity:    f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades:     usize,
    pub winning_trades:   usize,
    pub losing_trades:    usize,
    /// Fraction in [0, 1].
    pub win_rate:         f64,
    pub total_pnl:        f64,
    pub avg_win:          f64,
    pub avg_loss:         f64,
    pub max_win:          f64,
    pub max_loss:         f64,
    pub profit_factor:    f64,
    pub max_drawdown:     f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio:     f64,
    /// Percent.
    pub roi:              f64,
}

pub fn compute(
    trades:          &[Position],
    curve:           &[EquityPoint],
    initial_balance: f64,
    final_equity:    f64,
) -> Metrics {
    let pnls: Vec<f64> = trades.iter().filter_map(|t| t.realized_pnl).collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let profit_factor = if pnls.is_empty() {
        0.0
    } else if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        PROFIT_FACTOR_NO_LOSSES
    };

    let (max_drawdown, max_drawdown_pct) = max_drawdown(curve);
    let returns: Vec<f64> = trades.iter().filter_map(Position::trade_return).collect();

    Metrics {
        total_trades:   pnls.len(),
        winning_trades: wins.len(),
        losing_trades:  losses.len(),
        win_rate:       ratio(wins.len() as f64, pnls.len() as f64),
        total_pnl:      pnls.iter().sum(),
        avg_win:        mean(&wins),
        avg_loss:       mean(&losses),
        max_win:        wins.iter().copied().fold(0.0, f64::max),
        max_loss:       losses.iter().copied().fold(0.0, f64::min),
        profit_factor,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio:   sharpe(&returns),
        roi:            ratio(final_equity - initial_balance, initial_balance) * 100.0,
    }
}

/// Largest peak-to-trough decline: (absolute, percent of the peak).
pub fn max_drawdown(curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = (0.0, 0.0);
    for point in curve {
        peak = peak.max(point.equity);
        let dd = peak - point.equity;
        if dd > worst.0 {
            worst = (dd, ratio(dd, peak) * 100.0);
        }
    }
    worst
}

/// mean / population stdev × √252; 0 below two samples or with no variance.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    let sd = var.sqrt();
    if sd <= f64::EPSILON {
        return 0.0;
    }
    m / sd * TRADING_DAYS.sqrt()
}

fn mean(xs: &[f64]) -> f64 {
    ratio(xs.iter().sum(), xs.len() as f64)
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryParams, ExitReason, Side};
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn trade(exit: f64) -> Position {
        let params = EntryParams {
            balance:           1_000.0,
            position_size_pct: 1.0,
            leverage:          1.0,
            stop_loss_pct:     0.5,
            take_profit_pct:   0.5,
            entry_fee_rate:    0.0,
        };
        let mut p = Position::open(1, "X", Side::Long, 100.0, ts(0), &params);
        p.close(exit, ts(1), ExitReason::SignalFlip, 0.0);
        p
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint { timestamp: ts(i as u32), equity })
            .collect()
    }

    #[test]
    fn no_trades_yields_zeroed_metrics() {
        let m = compute(&[], &curve(&[1_000.0, 1_000.0]), 1_000.0, 1_000.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.roi, 0.0);
    }

    #[test]
    fn all_winners_use_sentinel() {
        let trades = [trade(110.0), trade(120.0)];
        let m = compute(&trades, &curve(&[1_000.0, 1_100.0, 1_300.0]), 1_000.0, 1_300.0);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_NO_LOSSES);
        assert_eq!(m.win_rate, 1.0);
        assert!((m.roi - 30.0).abs() < 1e-9);
        assert!((m.avg_win - 150.0).abs() < 1e-9);
    }

    #[test]
    fn mixed_trades() {
        let trades = [trade(110.0), trade(95.0), trade(105.0), trade(90.0)];
        let m = compute(&trades, &curve(&[1_000.0]), 1_000.0, 1_000.0);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 2);
        assert!((m.win_rate - 0.5).abs() < 1e-9);
        assert!((m.profit_factor - 1.0).abs() < 1e-9);
        assert!((m.max_win - 100.0).abs() < 1e-9);
        assert!((m.max_loss + 100.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_measures_largest_peak_to_trough() {
        let (abs, pct) = max_drawdown(&curve(&[100.0, 120.0, 90.0, 130.0, 117.0]));
        assert!((abs - 30.0).abs() < 1e-9);
        assert!((pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn sharpe_needs_variance() {
        assert_eq!(sharpe(&[0.01]), 0.0);
        assert_eq!(sharpe(&[0.02, 0.02, 0.02]), 0.0);
        let s = sharpe(&[0.02, -0.01]);
        // mean 0.005, sd 0.015
        assert!((s - (0.005 / 0.015) * 252f64.sqrt()).abs() < 1e-9);
    }
}
