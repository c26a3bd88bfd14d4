//! # engine::book — Position Book
//!
//! Per-symbol position state machine shared by the backtest simulator and
//! the live paper engine:
//!
//! ```text
//!   NoPosition ──BUY/SELL & breaker SAFE──▶ Open(side) ──exit──▶ NoPosition
//! ```
//!
//! ## Exit priority (per tick, while open)
//! 1. breaker TRIGGERED / RECOVERING → close at tick price
//! 2. stop-loss crossed              → close at the stop price
//! 3. take-profit crossed            → close at the target price
//! 4. opposite action                → close at tick price, optionally flip
//!
//! Exits 1–3 never re-enter on the same tick.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::breaker::BreakerState;
use crate::error::ValidationError;
use crate::models::{EntryParams, ExitReason, Position, Side, SignalRecord};

// ─── Input ────────────────────────────────────────────────────────────────────

/// One chronologically ordered simulator input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTick {
    pub signal:        SignalRecord,
    #[serde(default)]
    pub breaker_state: BreakerState,
    #[serde(default)]
    pub paused:        bool,
}

impl ReplayTick {
    pub fn new(signal: SignalRecord, breaker_state: BreakerState) -> Self {
        Self { signal, breaker_state, paused: false }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookConfig {
    pub position_size_pct:   f64,
    pub leverage:            f64,
    pub stop_loss_pct:       f64,
    pub take_profit_pct:     f64,
    pub entry_fee_rate:      f64,
    pub exit_fee_rate:       f64,
    pub flip_opens_opposite: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            position_size_pct:   0.10,
            leverage:            1.0,
            stop_loss_pct:       0.03,
            take_profit_pct:     0.06,
            entry_fee_rate:      0.001,
            exit_fee_rate:       0.001,
            flip_opens_opposite: true,
        }
    }
}

impl BookConfig {
    /// Same bounds for the live book and every backtest.
    pub fn validate(&self, initial_balance: f64) -> Result<(), ValidationError> {
        ValidationError::check_range("initial_balance", initial_balance, f64::MIN_POSITIVE, 1e12)?;
        ValidationError::check_range("position_size_pct", self.position_size_pct, f64::MIN_POSITIVE, 1.0)?;
        ValidationError::check_range("leverage", self.leverage, 1.0, 125.0)?;
        ValidationError::check_range("entry_fee_rate", self.entry_fee_rate, 0.0, 0.1)?;
        ValidationError::check_range("exit_fee_rate", self.exit_fee_rate, 0.0, 0.1)?;
        ValidationError::check_range("stop_loss_pct", self.stop_loss_pct, f64::MIN_POSITIVE, 0.99)?;
        ValidationError::check_range("take_profit_pct", self.take_profit_pct, f64::MIN_POSITIVE, 10.0)?;
        Ok(())
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "position", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookEvent {
    Opened(Position),
    Closed(Position),
}

// ─── Book ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PositionBook {
    config:        BookConfig,
    balance:       f64,
    open:          BTreeMap<String, Position>,
    closed:        Vec<Position>,
    last_price:    BTreeMap<String, f64>,
    next_trade_id: u64,
    fees_paid:     f64,
}

impl PositionBook {
    pub fn new(config: BookConfig, initial_balance: f64) -> Self {
        Self {
            config,
            balance:       initial_balance,
            open:          BTreeMap::new(),
            closed:        Vec::new(),
            last_price:    BTreeMap::new(),
            next_trade_id: 1,
            fees_paid:     0.0,
        }
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    /// Realised balance; moves only when a position closes.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn closed_trades(&self) -> &[Position] {
        &self.closed
    }

    pub fn into_parts(self) -> (Vec<Position>, Vec<Position>) {
        (self.closed, self.open.into_values().collect())
    }

    /// Balance plus unrealised PnL of open positions at their last seen price.
    pub fn equity(&self) -> f64 {
        self.balance
            + self
                .open
                .values()
                .map(|p| {
                    let price = self.last_price.get(&p.symbol).copied().unwrap_or(p.entry_price);
                    p.unrealized_pnl(price)
                })
                .sum::<f64>()
    }

    // ─── Tick Processing ─────────────────────────────────────────────────────

    pub fn apply(&mut self, tick: &ReplayTick) -> Vec<BookEvent> {
        let signal = &tick.signal;
        let price  = signal.price;
        let mut events = Vec::new();

        if !(price.is_finite() && price > 0.0) {
            warn!(symbol = %signal.symbol, price, "Unusable tick price, skipped");
            return events;
        }
        self.last_price.insert(signal.symbol.clone(), price);

        if tick.paused {
            debug!(symbol = %signal.symbol, "Trading paused, tick recorded only");
            return events;
        }

        if let Some(position) = self.open.get(&signal.symbol) {
            let exit = if tick.breaker_state.forces_exit() {
                Some((price, ExitReason::CircuitBreaker))
            } else if position.stop_loss_hit(price) {
                Some((position.stop_loss_price, ExitReason::StopLoss))
            } else if position.take_profit_hit(price) {
                Some((position.take_profit_price, ExitReason::TakeProfit))
            } else if position.side.is_opposed_by(signal.action) {
                Some((price, ExitReason::SignalFlip))
            } else {
                None
            };

            let Some((exit_price, reason)) = exit else {
                return events;
            };
            let closed = self.close(&signal.symbol, exit_price, signal.timestamp, reason);
            events.extend(closed.map(BookEvent::Closed));

            let may_flip = reason == ExitReason::SignalFlip && self.config.flip_opens_opposite;
            if !may_flip {
                return events;
            }
        }

        if tick.breaker_state != BreakerState::Safe {
            return events;
        }
        if let Some(side) = Side::from_action(signal.action) {
            events.extend(self.open(&signal.symbol, side, price, signal.timestamp).map(BookEvent::Opened));
        }
        events
    }

    fn open(&mut self, symbol: &str, side: Side, price: f64, ts: DateTime<Utc>) -> Option<Position> {
        if self.open.contains_key(symbol) {
            return None;
        }
        if self.balance <= 0.0 {
            warn!(symbol, balance = self.balance, "Balance exhausted, entry skipped");
            return None;
        }

        let params = EntryParams {
            balance:           self.balance,
            position_size_pct: self.config.position_size_pct,
            leverage:          self.config.leverage,
            stop_loss_pct:     self.config.stop_loss_pct,
            take_profit_pct:   self.config.take_profit_pct,
            entry_fee_rate:    self.config.entry_fee_rate,
        };
        let position = Position::open(self.next_trade_id, symbol, side, price, ts, &params);
        self.next_trade_id += 1;

        info!(
            trade_id = position.trade_id,
            symbol,
            side     = ?side,
            price,
            qty      = position.quantity,
            "📈 Position opened"
        );
        self.open.insert(symbol.to_string(), position.clone());
        Some(position)
    }

    fn close(
        &mut self,
        symbol:     &str,
        exit_price: f64,
        ts:         DateTime<Utc>,
        reason:     ExitReason,
    ) -> Option<Position> {
        let mut position = self.open.remove(symbol)?;
        let pnl = position.close(exit_price, ts, reason, self.config.exit_fee_rate);

        self.balance   += pnl;
        self.fees_paid += position.entry_fee + position.exit_fee.unwrap_or(0.0);

        info!(
            trade_id = position.trade_id,
            symbol,
            reason   = ?reason,
            exit_price,
            pnl,
            balance  = self.balance,
            "📉 Position closed"
        );
        self.closed.push(position.clone());
        Some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use chrono::{Duration, TimeZone};

    fn tick(minute: i64, price: f64, action: Action, state: BreakerState) -> ReplayTick {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        ReplayTick::new(
            SignalRecord {
                timestamp:     ts,
                symbol:        "SUIUSDC".to_string(),
                price,
                sources:       Default::default(),
                weights:       Default::default(),
                unified_score: 5.0,
                action,
                confidence:    80.0,
            },
            state,
        )
    }

    fn book() -> PositionBook {
        PositionBook::new(BookConfig::default(), 10_000.0)
    }

    #[test]
    fn negative_stop_loss_is_rejected() {
        let config = BookConfig { stop_loss_pct: -0.05, ..BookConfig::default() };
        assert!(matches!(
            config.validate(10_000.0),
            Err(ValidationError::OutOfRange { field: "stop_loss_pct", .. })
        ));
        assert!(BookConfig::default().validate(0.0).is_err());
        assert!(BookConfig::default().validate(10_000.0).is_ok());
    }

    #[test]
    fn long_stop_loss_fills_at_stop_price() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 96.5, Action::Hold, BreakerState::Safe));

        let BookEvent::Closed(pos) = &events[0] else { panic!("expected close") };
        assert_eq!(pos.exit_reason, Some(ExitReason::StopLoss));
        assert!((pos.exit_price.unwrap() - 97.0).abs() < 1e-9);
        assert!(b.open_position("SUIUSDC").is_none());
    }

    #[test]
    fn never_two_open_positions_per_symbol() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 101.0, Action::Buy, BreakerState::Safe));
        assert!(events.is_empty());
        assert_eq!(b.open_positions().count(), 1);
    }

    #[test]
    fn triggered_breaker_blocks_entries_and_force_closes() {
        let mut b = book();
        assert!(b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Triggered)).is_empty());

        b.apply(&tick(1, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(2, 99.0, Action::Buy, BreakerState::Triggered));
        assert_eq!(events.len(), 1);
        let BookEvent::Closed(pos) = &events[0] else { panic!("expected close") };
        assert_eq!(pos.exit_reason, Some(ExitReason::CircuitBreaker));
        assert_eq!(pos.exit_price, Some(99.0));

        assert!(b.apply(&tick(3, 99.0, Action::Sell, BreakerState::Recovering)).is_empty());
        assert!(b.apply(&tick(4, 99.0, Action::Sell, BreakerState::Warning)).is_empty());
    }

    #[test]
    fn breaker_exit_outranks_stop_loss() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 90.0, Action::Hold, BreakerState::Triggered));
        let BookEvent::Closed(pos) = &events[0] else { panic!("expected close") };
        assert_eq!(pos.exit_reason, Some(ExitReason::CircuitBreaker));
        assert_eq!(pos.exit_price, Some(90.0));
    }

    #[test]
    fn flip_closes_and_reverses() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 101.0, Action::Sell, BreakerState::Safe));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BookEvent::Closed(p) if p.exit_reason == Some(ExitReason::SignalFlip)));
        assert!(matches!(&events[1], BookEvent::Opened(p) if p.side == Side::Short && p.trade_id == 2));
    }

    #[test]
    fn flip_without_reentry_when_disabled() {
        let mut b = PositionBook::new(
            BookConfig { flip_opens_opposite: false, ..Default::default() },
            10_000.0,
        );
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 101.0, Action::Sell, BreakerState::Safe));
        assert_eq!(events.len(), 1);
        assert!(b.open_position("SUIUSDC").is_none());
    }

    #[test]
    fn take_profit_does_not_reenter_same_tick() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        let events = b.apply(&tick(1, 107.0, Action::Buy, BreakerState::Safe));
        assert_eq!(events.len(), 1);
        let BookEvent::Closed(pos) = &events[0] else { panic!("expected close") };
        assert!((pos.exit_price.unwrap() - 106.0).abs() < 1e-9);
        assert!(b.open_position("SUIUSDC").is_none());
    }

    #[test]
    fn paused_tick_neither_enters_nor_exits() {
        let mut b = book();
        let mut paused = tick(0, 100.0, Action::Buy, BreakerState::Safe);
        paused.paused = true;
        assert!(b.apply(&paused).is_empty());

        b.apply(&tick(1, 100.0, Action::Buy, BreakerState::Safe));
        let mut crash = tick(2, 50.0, Action::Sell, BreakerState::Triggered);
        crash.paused = true;
        assert!(b.apply(&crash).is_empty());
        assert!(b.open_position("SUIUSDC").is_some());
    }

    #[test]
    fn balance_moves_only_on_close() {
        let mut b = book();
        b.apply(&tick(0, 100.0, Action::Buy, BreakerState::Safe));
        assert_eq!(b.balance(), 10_000.0);
        assert!(b.equity() < 10_000.0); // entry fee already marked
        b.apply(&tick(1, 103.0, Action::Sell, BreakerState::Safe));
        assert!(b.balance() > 10_000.0);
        assert!(b.fees_paid() > 0.0);
    }
}
