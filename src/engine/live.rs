//! # engine::live — Monitor Loop
//!
//! ```text
//! every MONITOR_INTERVAL_SECS:
//!   1. fetch MarketUpdate (timeout)      ── error ──▶ record_unavailable, skip
//!   2. breaker.evaluate(snapshot)        ──▶ BREAKER_EVENT broadcast
//!   3. per symbol: scoreboard → SignalRecord
//!   4. SignalRecord + breaker state      ──▶ paper PositionBook
//! ```
//!
//! Paused ticks still produce signal records; the book ignores them.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::breaker::BreakerState;
use crate::engine::book::{BookEvent, ReplayTick};
use crate::events::WsEvent;
use crate::models::{MarketSnapshot, SignalRecord};
use crate::state::{AppState, SharedState};

/// A [`WsEvent::ServerStats`] heartbeat goes out every this many ticks.
const STATS_EVERY_TICKS: u64 = 10;

// ─── Market Update ────────────────────────────────────────────────────────────

/// What the market-data collaborator returns: the breaker snapshot plus the
/// last price of every traded symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdate {
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
    #[serde(default)]
    pub prices:   BTreeMap<String, f64>,
}

impl MarketUpdate {
    /// Explicit price first, then the benchmark assets by prefix
    /// (`BTCUSDT` → btc, `ETHUSDC` → eth).
    pub fn price_of(&self, symbol: &str) -> Option<f64> {
        if let Some(price) = self.prices.get(symbol) {
            return Some(*price);
        }
        let upper = symbol.to_ascii_uppercase();
        if upper.starts_with("BTC") {
            Some(self.snapshot.btc.price)
        } else if upper.starts_with("ETH") {
            Some(self.snapshot.eth.price)
        } else {
            None
        }
    }
}

// ─── Feed ─────────────────────────────────────────────────────────────────────

pub trait MarketFeed: Send + Sync {
    fn fetch(&self) -> impl Future<Output = anyhow::Result<MarketUpdate>> + Send;
}

/// Polls `GET {MARKET_URL}` for a JSON [`MarketUpdate`].
#[derive(Debug, Clone)]
pub struct HttpMarketFeed {
    client:  reqwest::Client,
    url:     String,
    timeout: Duration,
}

impl HttpMarketFeed {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, url: url.into(), timeout }
    }
}

impl MarketFeed for HttpMarketFeed {
    async fn fetch(&self) -> anyhow::Result<MarketUpdate> {
        self.client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Market API unreachable")?
            .error_for_status()
            .context("Market API returned an error status")?
            .json()
            .await
            .context("Failed to parse market update")
    }
}

// ─── One Tick ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No snapshot this tick; breaker state untouched, nothing aggregated.
    DataUnavailable { error: String },
    Evaluated {
        state:       BreakerState,
        signals:     Vec<SignalRecord>,
        book_events: Vec<BookEvent>,
    },
}

pub async fn run_once<F: MarketFeed>(state: &AppState, feed: &F) -> TickOutcome {
    let fetched = match tokio::time::timeout(state.config.market_timeout, feed.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "market fetch timed out after {:?}",
            state.config.market_timeout
        )),
    };

    let update = match fetched {
        Ok(update) => update,
        Err(err) => {
            let error = format!("{err:#}");
            state.breaker.record_unavailable(&error).await;
            state.broadcast(&WsEvent::MarketDataUnavailable {
                error: error.clone(),
                state: state.breaker.state().await,
            });
            return TickOutcome::DataUnavailable { error };
        }
    };

    let evaluation = state.ingest_snapshot(&update.snapshot).await;
    let breaker_state = evaluation.state;
    let safe = breaker_state.is_safe();
    let paused = state.is_paused();
    let now = Utc::now();

    let mut signals = Vec::with_capacity(state.config.symbols.len());
    let mut book_events = Vec::new();

    for symbol in &state.config.symbols {
        let Some(price) = update.price_of(symbol) else {
            warn!(%symbol, "No price in market update; symbol skipped");
            continue;
        };

        let sources = state.scoreboard.scores(symbol, now).await;
        let signal = state.aggregator.record(
            update.snapshot.timestamp,
            symbol,
            price,
            sources,
            &state.weights,
            safe,
        );
        debug!(
            %symbol,
            price,
            score      = signal.unified_score,
            action     = %signal.action,
            confidence = signal.confidence,
            "📈 Signal computed"
        );

        state.record_signal(signal.clone()).await;

        let tick = ReplayTick { signal: signal.clone(), breaker_state, paused };
        book_events.extend(state.apply_tick(&tick).await);
        signals.push(signal);
    }

    TickOutcome::Evaluated { state: breaker_state, signals, book_events }
}

// ─── Loop ─────────────────────────────────────────────────────────────────────

/// Runs forever; spawn it with `tokio::spawn`.
pub async fn run_monitor<F: MarketFeed>(state: SharedState, feed: F) {
    let mut interval = tokio::time::interval(state.config.monitor_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        interval = ?state.config.monitor_interval,
        symbols  = ?state.config.symbols,
        "🛰️ Monitor loop started"
    );

    let mut ticks: u64 = 0;
    loop {
        interval.tick().await;
        ticks += 1;

        match run_once(&state, &feed).await {
            TickOutcome::DataUnavailable { error } => {
                error!(%error, "❌ Monitor tick skipped, will retry next interval");
            }
            TickOutcome::Evaluated { state: breaker_state, signals, book_events } => {
                debug!(
                    %breaker_state,
                    signals = signals.len(),
                    book_events = book_events.len(),
                    "Monitor tick done"
                );
            }
        }

        if ticks % STATS_EVERY_TICKS == 0 {
            broadcast_stats(&state).await;
        }
    }
}

async fn broadcast_stats(state: &AppState) {
    let signals_recorded = state.signal_log.read().await.len();
    let (open_positions, balance) = {
        let book = state.book.lock().await;
        (book.open_positions().count(), book.balance())
    };
    state.broadcast(&WsEvent::ServerStats {
        breaker_state: state.breaker.state().await,
        signals_recorded,
        open_positions,
        balance,
        paused: state.is_paused(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{Action, SignalSource};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out queued results in order, then errors.
    struct StubFeed {
        queue: Mutex<VecDeque<anyhow::Result<MarketUpdate>>>,
    }

    impl StubFeed {
        fn new(items: Vec<anyhow::Result<MarketUpdate>>) -> Self {
            Self { queue: Mutex::new(items.into()) }
        }
    }

    impl MarketFeed for StubFeed {
        async fn fetch(&self) -> anyhow::Result<MarketUpdate> {
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("feed exhausted")))
        }
    }

    fn update(btc_change_1h: f64, sui_price: f64) -> MarketUpdate {
        let mut snapshot = MarketSnapshot::nominal(Utc::now());
        snapshot.btc.change_1h = Some(btc_change_1h);
        MarketUpdate {
            snapshot,
            prices: BTreeMap::from([("SUIUSDC".to_string(), sui_price)]),
        }
    }

    fn state() -> AppState {
        AppState::new(AppConfig::default()).unwrap()
    }

    async fn bullish(state: &AppState) {
        let now = Utc::now();
        for source in [SignalSource::Technical, SignalSource::ChartAnalysis] {
            state.scoreboard.submit("SUIUSDC", source, 9.0, now).await;
        }
    }

    #[test]
    fn price_falls_back_to_benchmark_prefix() {
        let u = update(0.0, 1.5);
        assert_eq!(u.price_of("SUIUSDC"), Some(1.5));
        assert_eq!(u.price_of("BTCUSDT"), Some(60_000.0));
        assert_eq!(u.price_of("SOLUSDC"), None);
    }

    #[test]
    fn update_parses_flat_snapshot_json() {
        let raw = r#"{
            "timestamp": "2024-03-01T00:00:00Z",
            "btc": { "price": 60000.0, "change_1h": -2.0 },
            "eth": { "price": 3000.0 },
            "prices": { "SUIUSDC": 1.25 }
        }"#;
        let u: MarketUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(u.snapshot.btc.change_1h, Some(-2.0));
        assert_eq!(u.snapshot.eth.change_1h, None);
        assert_eq!(u.price_of("SUIUSDC"), Some(1.25));
    }

    #[tokio::test]
    async fn feed_failure_keeps_state_and_skips_aggregation() {
        let st = state();
        let feed = StubFeed::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let outcome = run_once(&st, &feed).await;
        assert!(matches!(outcome, TickOutcome::DataUnavailable { .. }));
        assert_eq!(st.breaker.state().await, BreakerState::Safe);
        assert!(st.recent_signals(None, 10).await.is_empty());
        assert_eq!(st.breaker.get_status().await.consecutive_data_misses, 1);
    }

    #[tokio::test]
    async fn safe_bullish_tick_opens_a_paper_long() {
        let st = state();
        bullish(&st).await;
        let feed = StubFeed::new(vec![Ok(update(0.4, 1.5))]);

        let TickOutcome::Evaluated { state, signals, book_events } = run_once(&st, &feed).await else {
            panic!("expected an evaluated tick");
        };
        assert_eq!(state, BreakerState::Safe);
        assert_eq!(signals[0].action, Action::Buy);
        assert_eq!(book_events.len(), 1);
        assert!(st.book.lock().await.open_position("SUIUSDC").is_some());
    }

    #[tokio::test]
    async fn crash_tick_holds_and_force_closes() {
        let st = state();
        bullish(&st).await;
        let feed = StubFeed::new(vec![Ok(update(0.4, 1.5)), Ok(update(-20.0, 1.4))]);

        run_once(&st, &feed).await;
        let TickOutcome::Evaluated { state, signals, book_events } = run_once(&st, &feed).await else {
            panic!("expected an evaluated tick");
        };
        assert_eq!(state, BreakerState::Triggered);
        assert_eq!(signals[0].action, Action::Hold);
        assert!(matches!(book_events.as_slice(), [BookEvent::Closed(_)]));
        assert!(st.book.lock().await.open_position("SUIUSDC").is_none());
    }

    #[tokio::test]
    async fn paused_tick_records_signal_without_trading() {
        let st = state();
        st.set_paused(true);
        bullish(&st).await;
        let feed = StubFeed::new(vec![Ok(update(0.4, 1.5))]);

        let TickOutcome::Evaluated { signals, book_events, .. } = run_once(&st, &feed).await else {
            panic!("expected an evaluated tick");
        };
        assert_eq!(signals.len(), 1);
        assert!(book_events.is_empty());
        assert_eq!(st.recent_signals(Some("SUIUSDC"), 10).await.len(), 1);
    }
}
