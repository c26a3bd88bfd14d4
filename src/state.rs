//! # state
//!
//! AppState shared by every axum handler and the live monitor loop: the
//! circuit breaker, the aggregator and its scoreboard, the paper position
//! book, the in-memory signal log, the pause flag and the WebSocket
//! broadcast channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

use crate::breaker::{BreakerEvent, CircuitBreaker, Evaluation};
use crate::config::AppConfig;
use crate::engine::aggregator::SignalAggregator;
use crate::engine::book::{BookEvent, PositionBook, ReplayTick};
use crate::engine::scoreboard::Scoreboard;
use crate::error::ValidationError;
use crate::events::WsEvent;
use crate::models::{MarketSnapshot, SignalRecord, WeightMap};

/// Signals kept in memory for `/api/signals/history`.
const SIGNAL_LOG_SIZE: usize = 5_000;

// ─── AppState ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    // ── Decision Core ─────────────────────────────────────────────────────────
    pub breaker:    CircuitBreaker,
    pub aggregator: Arc<SignalAggregator>,
    pub weights:    Arc<WeightMap>,
    /// Latest sub-score per source, submitted by upstream collaborators.
    pub scoreboard: Scoreboard,

    // ── Paper Trading ─────────────────────────────────────────────────────────
    pub book:       Arc<Mutex<PositionBook>>,
    pub signal_log: Arc<RwLock<VecDeque<SignalRecord>>>,
    paused:         Arc<AtomicBool>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    /// Pre-serialised [`WsEvent`] JSON.
    pub broadcast_tx: broadcast::Sender<String>,

    /// Shared reqwest client (connection pooling) for the market feed.
    pub http_client: reqwest::Client,

    #[cfg(feature = "postgres")]
    pub db: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, ValidationError> {
        let aggregator = SignalAggregator::new(config.aggregator)?;
        config.book.validate(config.live_balance)?;
        let (broadcast_tx, _) = broadcast::channel(256);

        Ok(Self {
            breaker:      CircuitBreaker::new(config.breaker),
            aggregator:   Arc::new(aggregator),
            weights:      Arc::new(WeightMap::default()),
            scoreboard:   Scoreboard::new(),
            book:         Arc::new(Mutex::new(PositionBook::new(config.book, config.live_balance))),
            signal_log:   Arc::new(RwLock::new(VecDeque::with_capacity(256))),
            paused:       Arc::new(AtomicBool::new(config.trading_paused)),
            broadcast_tx,
            http_client:  reqwest::Client::new(),
            #[cfg(feature = "postgres")]
            db:           None,
            config:       Arc::new(config),
        })
    }

    #[cfg(feature = "postgres")]
    pub fn with_db(mut self, pool: sqlx::PgPool) -> Self {
        self.db = Some(pool);
        self
    }

    // ── Pause ─────────────────────────────────────────────────────────────────

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        let changed = self.paused.swap(paused, Ordering::SeqCst) != paused;
        if changed {
            if paused {
                warn!("⏸️ Trading PAUSED: signals recorded, no entries or exits");
            } else {
                info!("▶️ Trading resumed");
            }
            self.broadcast(&WsEvent::TradingPaused { paused });
        }
        changed
    }

    // ── Broadcast ─────────────────────────────────────────────────────────────

    /// No listeners is not an error (headless mode).
    pub fn broadcast(&self, event: &WsEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }

    // ── Breaker ───────────────────────────────────────────────────────────────

    /// Evaluates a snapshot and publishes any audit events it produced.
    pub async fn ingest_snapshot(&self, snapshot: &MarketSnapshot) -> Evaluation {
        let evaluation = self.breaker.evaluate(snapshot).await;
        for event in &evaluation.events {
            self.publish_breaker_event(event).await;
        }
        evaluation
    }

    pub async fn publish_breaker_event(&self, event: &BreakerEvent) {
        self.broadcast(&WsEvent::BreakerEvent { record: Box::new(event.clone()) });

        #[cfg(feature = "postgres")]
        if let Some(pool) = &self.db {
            if let Err(err) = crate::db::insert_breaker_event(pool, event).await {
                warn!(error = %err, "Failed to persist breaker event");
            }
        }
    }

    // ── Signals ───────────────────────────────────────────────────────────────

    pub async fn record_signal(&self, signal: SignalRecord) {
        {
            let mut log = self.signal_log.write().await;
            if log.len() >= SIGNAL_LOG_SIZE {
                log.pop_front();
            }
            log.push_back(signal.clone());
        }

        #[cfg(feature = "postgres")]
        if let Some(pool) = &self.db {
            if let Err(err) = crate::db::insert_signal(pool, &signal).await {
                warn!(error = %err, "Failed to persist signal");
            }
        }

        self.broadcast(&WsEvent::SignalRecorded { signal: Box::new(signal) });
    }

    /// Newest first, optionally filtered by symbol.
    pub async fn recent_signals(&self, symbol: Option<&str>, limit: usize) -> Vec<SignalRecord> {
        let log = self.signal_log.read().await;
        log.iter()
            .rev()
            .filter(|s| symbol.map_or(true, |sym| s.symbol == sym))
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Book ──────────────────────────────────────────────────────────────────

    /// Applies one tick to the paper book and publishes the outcome.
    pub async fn apply_tick(&self, tick: &ReplayTick) -> Vec<BookEvent> {
        let events = self.book.lock().await.apply(tick);

        for event in &events {
            #[cfg(feature = "postgres")]
            if let (Some(pool), BookEvent::Closed(position)) = (&self.db, event) {
                if let Err(err) = crate::db::insert_trade(pool, position).await {
                    warn!(error = %err, "Failed to persist trade");
                }
            }
            self.broadcast(&WsEvent::from(event.clone()));
        }
        events
    }
}

pub type SharedState = Arc<AppState>;

/// Builds the shared state, connecting PostgreSQL first when the
/// `postgres` feature is on and `DATABASE_URL` is set.
pub async fn build_state(config: AppConfig) -> anyhow::Result<SharedState> {
    #[cfg(feature = "postgres")]
    let database_url = config.database_url.clone();

    let state = AppState::new(config)?;

    #[cfg(feature = "postgres")]
    let state = match database_url {
        Some(url) => state.with_db(crate::db::init_pool(&url).await?),
        None => state,
    };

    Ok(Arc::new(state))
}
