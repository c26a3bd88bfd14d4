//! # engine::simulator — Backtest
//!
//! Replays recorded signals through a fresh [`PositionBook`] and reports
//! the resulting trades, equity curve and metrics.
//!
//! ## How it works
//! 1. keep ticks for the configured symbol inside [start, end]
//! 2. stable-sort them by timestamp
//! 3. rescore each signal under the config's weights / thresholds
//!    (signals without sub-scores keep their recorded action)
//! 4. feed the book; sample equity at every close
//!
//! A run never reads the clock and never draws random ids, so identical
//! config and ticks always give an identical result.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::breaker::BreakerState;
use crate::engine::aggregator::{AggregatorConfig, SignalAggregator};
use crate::engine::book::{BookConfig, BookEvent, PositionBook, ReplayTick};
use crate::engine::metrics::{self, EquityPoint, Metrics};
use crate::error::ValidationError;
use crate::models::{Action, Position, SignalRecord, WeightMap};

/// Fewer usable ticks than this is reported as insufficient data.
const MIN_TICKS: usize = 2;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Raw, unvalidated config as received over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfigInput {
    pub symbol:              String,
    /// RFC 3339 or `YYYY-MM-DD`.
    pub start_date:          Option<String>,
    /// RFC 3339 or `YYYY-MM-DD` (whole day included).
    pub end_date:            Option<String>,
    pub initial_balance:     f64,
    pub position_size_pct:   f64,
    pub leverage:            f64,
    pub entry_fee_rate:      f64,
    pub exit_fee_rate:       f64,
    pub stop_loss_pct:       f64,
    pub take_profit_pct:     f64,
    pub weights:             WeightMap,
    pub buy_threshold:       f64,
    pub sell_threshold:      f64,
    pub min_confidence:      f64,
    pub flip_opens_opposite: bool,
}

impl Default for BacktestConfigInput {
    fn default() -> Self {
        let book = BookConfig::default();
        let agg = AggregatorConfig::default();
        Self {
            symbol:              "SUIUSDC".to_string(),
            start_date:          None,
            end_date:            None,
            initial_balance:     10_000.0,
            position_size_pct:   book.position_size_pct,
            leverage:            book.leverage,
            entry_fee_rate:      book.entry_fee_rate,
            exit_fee_rate:       book.exit_fee_rate,
            stop_loss_pct:       book.stop_loss_pct,
            take_profit_pct:     book.take_profit_pct,
            weights:             WeightMap::default(),
            buy_threshold:       agg.buy_threshold,
            sell_threshold:      agg.sell_threshold,
            min_confidence:      agg.min_confidence,
            flip_opens_opposite: book.flip_opens_opposite,
        }
    }
}

/// Validated backtest configuration.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub symbol:          String,
    pub start:           Option<DateTime<Utc>>,
    pub end:             Option<DateTime<Utc>>,
    pub initial_balance: f64,
    pub book:            BookConfig,
    pub weights:         WeightMap,
    aggregator:          SignalAggregator,
}

impl BacktestConfig {
    pub fn new(input: BacktestConfigInput) -> Result<Self, ValidationError> {
        let symbol = input.symbol.trim().to_string();
        if symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let book = BookConfig {
            position_size_pct:   input.position_size_pct,
            leverage:            input.leverage,
            stop_loss_pct:       input.stop_loss_pct,
            take_profit_pct:     input.take_profit_pct,
            entry_fee_rate:      input.entry_fee_rate,
            exit_fee_rate:       input.exit_fee_rate,
            flip_opens_opposite: input.flip_opens_opposite,
        };
        book.validate(input.initial_balance)?;
        input.weights.validate()?;

        let aggregator = SignalAggregator::new(AggregatorConfig {
            buy_threshold:  input.buy_threshold,
            sell_threshold: input.sell_threshold,
            min_confidence: input.min_confidence,
        })?;

        let start = input.start_date.as_deref().map(|s| parse_date("start_date", s, false)).transpose()?;
        let end = input.end_date.as_deref().map(|s| parse_date("end_date", s, true)).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(ValidationError::InvertedPeriod { start, end });
            }
        }

        Ok(Self {
            symbol,
            start,
            end,
            initial_balance: input.initial_balance,
            book,
            weights: input.weights,
            aggregator,
        })
    }

    fn in_window(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// RFC 3339, or a bare date meaning the start (or, for `end_of_day`, the
/// last instant) of that UTC day.
fn parse_date(field: &'static str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let invalid = || ValidationError::InvalidDate { field, value: raw.to_string() };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(invalid)?;
    Ok(date.and_time(time).and_utc())
}

// ─── Result ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub buy:  usize,
    pub sell: usize,
    pub hold: usize,
}

impl ActionCounts {
    fn count(&mut self, action: Action) {
        match action {
            Action::Buy  => self.buy += 1,
            Action::Sell => self.sell += 1,
            Action::Hold => self.hold += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol:            String,
    pub first_tick:        Option<DateTime<Utc>>,
    pub last_tick:         Option<DateTime<Utc>>,
    pub initial_balance:   f64,
    pub final_balance:     f64,
    /// Final balance plus mark-to-market of the still-open position.
    pub final_equity:      f64,
    pub total_fees:        f64,
    pub ticks_replayed:    usize,
    pub paused_ticks:      usize,
    pub signal_actions:    ActionCounts,
    pub insufficient_data: bool,
    pub equity_curve:      Vec<EquityPoint>,
    pub trades:            Vec<Position>,
    pub open_position:     Option<Position>,
    pub metrics:           Metrics,
}

impl BacktestResult {
    fn insufficient(config: &BacktestConfig, usable: &[&ReplayTick]) -> Self {
        Self {
            symbol:            config.symbol.clone(),
            first_tick:        usable.first().map(|t| t.signal.timestamp),
            last_tick:         usable.last().map(|t| t.signal.timestamp),
            initial_balance:   config.initial_balance,
            final_balance:     config.initial_balance,
            final_equity:      config.initial_balance,
            total_fees:        0.0,
            ticks_replayed:    usable.len(),
            paused_ticks:      0,
            signal_actions:    ActionCounts::default(),
            insufficient_data: true,
            equity_curve:      Vec::new(),
            trades:            Vec::new(),
            open_position:     None,
            metrics:           Metrics::default(),
        }
    }
}

// ─── Run ──────────────────────────────────────────────────────────────────────

pub fn run_backtest(config: &BacktestConfig, ticks: &[ReplayTick]) -> BacktestResult {
    let mut usable: Vec<&ReplayTick> = ticks
        .iter()
        .filter(|t| t.signal.symbol == config.symbol && config.in_window(t.signal.timestamp))
        .collect();
    usable.sort_by_key(|t| t.signal.timestamp);

    if usable.len() < MIN_TICKS {
        warn!(symbol = %config.symbol, ticks = usable.len(), "⚠️ Insufficient data for backtest");
        return BacktestResult::insufficient(config, &usable);
    }

    let mut book = PositionBook::new(config.book, config.initial_balance);
    let mut curve = vec![EquityPoint {
        timestamp: usable[0].signal.timestamp,
        equity:    config.initial_balance,
    }];
    let mut actions = ActionCounts::default();
    let mut paused_ticks = 0;

    for tick in &usable {
        let signal = rescore(config, &tick.signal, tick.breaker_state);
        actions.count(signal.action);
        if tick.paused {
            paused_ticks += 1;
        }

        let replay = ReplayTick {
            signal,
            breaker_state: tick.breaker_state,
            paused:        tick.paused,
        };
        for event in book.apply(&replay) {
            if let BookEvent::Closed(position) = event {
                curve.push(EquityPoint {
                    timestamp: position.exit_timestamp.unwrap_or(replay.signal.timestamp),
                    equity:    book.balance(),
                });
            }
        }
    }

    let last_ts = usable[usable.len() - 1].signal.timestamp;
    let final_equity = book.equity();
    curve.push(EquityPoint { timestamp: last_ts, equity: final_equity });

    let final_balance = book.balance();
    let total_fees = book.fees_paid();
    let (trades, mut still_open) = book.into_parts();
    let metrics = metrics::compute(&trades, &curve, config.initial_balance, final_equity);

    info!(
        symbol = %config.symbol,
        ticks  = usable.len(),
        trades = metrics.total_trades,
        roi    = metrics.roi,
        "📊 Backtest complete"
    );

    BacktestResult {
        symbol:            config.symbol.clone(),
        first_tick:        Some(usable[0].signal.timestamp),
        last_tick:         Some(last_ts),
        initial_balance:   config.initial_balance,
        final_balance,
        final_equity,
        total_fees,
        ticks_replayed:    usable.len(),
        paused_ticks,
        signal_actions:    actions,
        insufficient_data: false,
        equity_curve:      curve,
        trades,
        open_position:     still_open.pop(),
        metrics,
    }
}

fn rescore(config: &BacktestConfig, signal: &SignalRecord, state: BreakerState) -> SignalRecord {
    let safe = state.is_safe();
    if signal.sources.present().next().is_some() {
        return config.aggregator.record(
            signal.timestamp,
            &signal.symbol,
            signal.price,
            signal.sources,
            &config.weights,
            safe,
        );
    }
    let mut kept = signal.clone();
    if !safe {
        kept.action = Action::Hold;
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, SignalSource, SourceScores};
    use chrono::{Duration, TimeZone};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn scored(minute: i64, price: f64, tech: f64, state: BreakerState) -> ReplayTick {
        ReplayTick::new(
            SignalRecord {
                timestamp:     ts(minute),
                symbol:        "SUIUSDC".to_string(),
                price,
                sources:       SourceScores::default().with(SignalSource::Technical, tech),
                weights:       WeightMap::default(),
                unified_score: 0.0,
                action:        Action::Hold,
                confidence:    0.0,
            },
            state,
        )
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new(BacktestConfigInput::default()).unwrap()
    }

    #[test]
    fn long_stop_loss_closes_at_exactly_the_stop() {
        let ticks = [
            scored(0, 100.0, 8.0, BreakerState::Safe),
            scored(1, 95.0, 5.0, BreakerState::Safe),
        ];
        let result = run_backtest(&config(), &ticks);
        assert_eq!(result.trades.len(), 1);
        let t = &result.trades[0];
        assert_eq!(t.exit_reason, Some(ExitReason::StopLoss));
        assert!((t.exit_price.unwrap() - 97.0).abs() < 1e-9);
        assert_eq!(result.equity_curve.len(), 3);
        assert!(result.metrics.roi < 0.0);
    }

    #[test]
    fn insufficient_data_is_flagged_not_an_error() {
        let result = run_backtest(&config(), &[scored(0, 100.0, 8.0, BreakerState::Safe)]);
        assert!(result.insufficient_data);
        assert!(result.trades.is_empty());
        assert_eq!(result.final_equity, 10_000.0);

        let empty = run_backtest(&config(), &[]);
        assert!(empty.insufficient_data);
    }

    #[test]
    fn foreign_symbols_and_out_of_window_ticks_are_skipped() {
        let mut other = scored(1, 50.0, 8.0, BreakerState::Safe);
        other.signal.symbol = "BTCUSDT".to_string();
        let cfg = BacktestConfig::new(BacktestConfigInput {
            start_date: Some("2024-03-01T00:02:00Z".to_string()),
            ..Default::default()
        })
        .unwrap();
        let ticks = [
            scored(0, 100.0, 8.0, BreakerState::Safe),
            other,
            scored(2, 100.0, 5.0, BreakerState::Safe),
            scored(3, 100.0, 5.0, BreakerState::Safe),
        ];
        let result = run_backtest(&cfg, &ticks);
        assert_eq!(result.ticks_replayed, 2);
        assert!(result.trades.is_empty());
    }

    #[test]
    fn unsorted_input_is_replayed_chronologically() {
        let ticks = [
            scored(2, 110.0, 5.0, BreakerState::Safe),
            scored(0, 100.0, 8.0, BreakerState::Safe),
            scored(1, 101.0, 5.0, BreakerState::Safe),
        ];
        let result = run_backtest(&config(), &ticks);
        assert_eq!(result.first_tick, Some(ts(0)));
        assert_eq!(result.trades[0].exit_reason, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn triggered_breaker_blocks_entry_and_forces_exit() {
        let ticks = [
            scored(0, 100.0, 8.0, BreakerState::Triggered),
            scored(1, 100.0, 8.0, BreakerState::Safe),
            scored(2, 98.0, 8.0, BreakerState::Triggered),
            scored(3, 98.0, 8.0, BreakerState::Recovering),
        ];
        let result = run_backtest(&config(), &ticks);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry_timestamp, ts(1));
        assert_eq!(result.trades[0].exit_reason, Some(ExitReason::CircuitBreaker));
        assert!(result.open_position.is_none());
    }

    #[test]
    fn open_position_is_marked_to_market() {
        let ticks = [
            scored(0, 100.0, 8.0, BreakerState::Safe),
            scored(1, 104.0, 8.0, BreakerState::Safe),
        ];
        let result = run_backtest(&config(), &ticks);
        assert!(result.trades.is_empty());
        assert!(result.open_position.is_some());
        assert_eq!(result.final_balance, 10_000.0);
        // qty 10, +40 gross, 1.0 entry fee
        assert!((result.final_equity - 10_039.0).abs() < 1e-9);
        assert!((result.metrics.roi - 0.39).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let ticks: Vec<_> = (0..50)
            .map(|i| {
                let price = 100.0 + (i as f64 * 0.7).sin() * 8.0;
                let tech = if i % 7 < 3 { 8.0 } else if i % 7 < 5 { 2.0 } else { 5.0 };
                scored(i, price, tech, BreakerState::Safe)
            })
            .collect();
        let a = run_backtest(&config(), &ticks);
        let b = run_backtest(&config(), &ticks);
        assert_eq!(a, b);
        assert!(a.metrics.total_trades > 0);
    }

    #[test]
    fn paused_ticks_record_but_do_not_trade() {
        let mut first = scored(0, 100.0, 8.0, BreakerState::Safe);
        first.paused = true;
        let result = run_backtest(&config(), &[first, scored(1, 100.0, 5.0, BreakerState::Safe)]);
        assert_eq!(result.paused_ticks, 1);
        assert_eq!(result.signal_actions.buy, 1);
        assert!(result.open_position.is_none());
    }

    #[test]
    fn config_validation() {
        let bad = |input: BacktestConfigInput| BacktestConfig::new(input).unwrap_err();

        assert_eq!(
            bad(BacktestConfigInput { symbol: " ".into(), ..Default::default() }),
            ValidationError::EmptySymbol
        );
        assert!(matches!(
            bad(BacktestConfigInput { leverage: 0.5, ..Default::default() }),
            ValidationError::OutOfRange { field: "leverage", .. }
        ));
        assert!(matches!(
            bad(BacktestConfigInput { start_date: Some("yesterday".into()), ..Default::default() }),
            ValidationError::InvalidDate { field: "start_date", .. }
        ));
        assert!(matches!(
            bad(BacktestConfigInput {
                start_date: Some("2024-03-02".into()),
                end_date:   Some("2024-03-01".into()),
                ..Default::default()
            }),
            ValidationError::InvertedPeriod { .. }
        ));
        assert!(matches!(
            bad(BacktestConfigInput { buy_threshold: 3.0, ..Default::default() }),
            ValidationError::InvertedThresholds { .. }
        ));
    }

    #[test]
    fn bare_end_date_includes_whole_day() {
        let cfg = BacktestConfig::new(BacktestConfigInput {
            end_date: Some("2024-03-01".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(cfg.in_window(Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap()));
        assert!(!cfg.in_window(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()));
    }
}
