pub mod backtest;
pub mod breaker;
pub mod control;
pub mod monitor;
pub mod positions;
pub mod signals;
