//! # models::position
//!
//! Defines [`Position`], the lifecycle record of one trade on one symbol.
//!
//! ## Lifecycle
//! `Position::open` creates an `OPEN` record; `Position::close` is the only
//! mutation and moves it to `CLOSED`, filling the exit fields.  A closed
//! position is never touched again; the book hands out clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Action;

// ─── Side ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// BUY opens LONG, SELL opens SHORT, HOLD opens nothing.
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Buy  => Some(Side::Long),
            Action::Sell => Some(Side::Short),
            Action::Hold => None,
        }
    }

    /// +1 for LONG, -1 for SHORT.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Side::Long  => 1.0,
            Side::Short => -1.0,
        }
    }

    /// `true` when `action` points the other way.
    pub fn is_opposed_by(self, action: Action) -> bool {
        matches!(
            (self, action),
            (Side::Long, Action::Sell) | (Side::Short, Action::Buy)
        )
    }
}

// ─── Status / ExitReason ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SignalFlip,
    CircuitBreaker,
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Sequential id inside one book / backtest run.
    pub trade_id:          u64,
    pub symbol:            String,
    pub side:              Side,
    pub entry_price:       f64,
    pub quantity:          f64,
    pub stop_loss_price:   f64,
    pub take_profit_price: f64,
    pub entry_timestamp:   DateTime<Utc>,
    pub entry_fee:         f64,
    pub status:            PositionStatus,
    // ── Filled on close ───────────────────────────────────────────────────────
    pub exit_price:        Option<f64>,
    pub exit_timestamp:    Option<DateTime<Utc>>,
    pub exit_reason:       Option<ExitReason>,
    pub exit_fee:          Option<f64>,
    pub realized_pnl:      Option<f64>,
}

/// Sizing and protection parameters needed to open a position.
#[derive(Debug, Clone, Copy)]
pub struct EntryParams {
    pub balance:           f64,
    pub position_size_pct: f64,
    pub leverage:          f64,
    pub stop_loss_pct:     f64,
    pub take_profit_pct:   f64,
    pub entry_fee_rate:    f64,
}

impl Position {
    pub fn open(
        trade_id:  u64,
        symbol:    &str,
        side:      Side,
        price:     f64,
        timestamp: DateTime<Utc>,
        params:    &EntryParams,
    ) -> Self {
        let quantity = params.balance * params.position_size_pct * params.leverage / price;
        let (stop_loss_price, take_profit_price) = match side {
            Side::Long => (
                price * (1.0 - params.stop_loss_pct),
                price * (1.0 + params.take_profit_pct),
            ),
            Side::Short => (
                price * (1.0 + params.stop_loss_pct),
                price * (1.0 - params.take_profit_pct),
            ),
        };

        Self {
            trade_id,
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            quantity,
            stop_loss_price,
            take_profit_price,
            entry_timestamp: timestamp,
            entry_fee: price * quantity * params.entry_fee_rate,
            status: PositionStatus::Open,
            exit_price: None,
            exit_timestamp: None,
            exit_reason: None,
            exit_fee: None,
            realized_pnl: None,
        }
    }

    /// Price PnL before fees at `price`.
    pub fn gross_pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Mark-to-market PnL at `price` (entry fee already paid, exit fee not yet).
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.gross_pnl_at(price) - self.entry_fee
    }

    pub fn entry_notional(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// LONG: price at or below the stop.  SHORT: at or above.
    pub fn stop_loss_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Long  => price <= self.stop_loss_price,
            Side::Short => price >= self.stop_loss_price,
        }
    }

    /// LONG: price at or above the target.  SHORT: at or below.
    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Long  => price >= self.take_profit_price,
            Side::Short => price <= self.take_profit_price,
        }
    }

    /// Closes the position and returns its realized PnL (net of both fees).
    ///
    /// Closing an already-closed position is a no-op returning the original
    /// realized PnL, keeping closed records immutable.
    pub fn close(
        &mut self,
        exit_price:    f64,
        timestamp:     DateTime<Utc>,
        reason:        ExitReason,
        exit_fee_rate: f64,
    ) -> f64 {
        if let Some(pnl) = self.realized_pnl {
            return pnl;
        }
        let exit_fee = exit_price * self.quantity * exit_fee_rate;
        let pnl = self.gross_pnl_at(exit_price) - self.entry_fee - exit_fee;

        self.status         = PositionStatus::Closed;
        self.exit_price     = Some(exit_price);
        self.exit_timestamp = Some(timestamp);
        self.exit_reason    = Some(reason);
        self.exit_fee       = Some(exit_fee);
        self.realized_pnl   = Some(pnl);
        pnl
    }

    /// Per-trade return used by the Sharpe ratio: realized PnL / entry notional.
    pub fn trade_return(&self) -> Option<f64> {
        let notional = self.entry_notional();
        match self.realized_pnl {
            Some(pnl) if notional > 0.0 => Some(pnl / notional),
            _ => None,
        }
    }
}
