//! # events
//!
//! Defines [`WsEvent`], every event broadcast to `/ws/monitor` listeners.
//!
//! Events are serialised to a JSON `String` before going on the
//! `tokio::sync::broadcast` channel so receivers never need `Clone` on the
//! payload types.

use serde::Serialize;

use crate::breaker::{BreakerEvent, BreakerState};
use crate::engine::book::BookEvent;
use crate::models::{Position, SignalRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    /// Audit-log entry from the circuit breaker (trigger, recovery, resume…).
    BreakerEvent {
        record: Box<BreakerEvent>,
    },

    /// The monitor could not fetch a market snapshot this tick.
    MarketDataUnavailable {
        error:  String,
        state:  BreakerState,
    },

    /// A unified signal was computed for one symbol.
    SignalRecorded {
        signal: Box<SignalRecord>,
    },

    PositionOpened {
        position: Box<Position>,
    },

    PositionClosed {
        position: Box<Position>,
    },

    /// Pause flag toggled through the control surface.
    TradingPaused {
        paused: bool,
    },

    /// Periodic heartbeat so dashboards know the loop is alive.
    ServerStats {
        breaker_state:    BreakerState,
        signals_recorded: usize,
        open_positions:   usize,
        balance:          f64,
        paused:           bool,
    },
}

impl WsEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

impl From<BookEvent> for WsEvent {
    fn from(event: BookEvent) -> Self {
        match event {
            BookEvent::Opened(position) => WsEvent::PositionOpened { position: Box::new(position) },
            BookEvent::Closed(position) => WsEvent::PositionClosed { position: Box::new(position) },
        }
    }
}
