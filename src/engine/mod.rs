//! Decision and simulation engine: source scoring, weighted aggregation,
//! the position book shared by live and replay, metrics, the backtester,
//! the weight optimizer and the live monitor loop.

pub mod aggregator;
pub mod book;
pub mod feed;
pub mod live;
pub mod metrics;
pub mod optimizer;
pub mod scoreboard;
pub mod scoring;
pub mod simulator;
