//! # tradegate — Crash-Gated Signal Aggregation & Paper Trading Core
//!
//! ```text
//!  ┌─────────────┐  POST /api/signals/scores   ┌──────────────────────────────┐
//!  │ Analysis    │ ──────────────────────────▶ │ AppState                     │
//!  │ modules     │                              │ ├─ scoreboard                │
//!  └─────────────┘                              │ ├─ breaker  🛡️               │
//!                                               │ ├─ aggregator                │
//!  ┌─────────────┐  GET MARKET_URL (monitor)    │ ├─ book (paper)              │
//!  │ Market data │ ◀──────────────────────────  │ ├─ signal_log                │
//!  └─────────────┘                              │ └─ broadcast_tx ───────────┐ │
//!                                               └────────────────────────────┘ │
//!  ┌─────────────┐  ws://host/ws/monitor  ◀──────────────────────────────────── ┘
//!  │  Dashboard  │  GET  /api/breaker/*, /api/positions
//!  └─────────────┘  POST /api/backtest[/optimize]  📊
//! ```

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod breaker;
mod config;
#[cfg(feature = "postgres")]
mod db;
mod engine;
mod error;
mod events;
mod models;
mod routes;
mod state;

use auth::require_api_key;
use config::AppConfig;
use engine::live::{run_monitor, HttpMarketFeed};
use routes::{
    backtest::{backtest, optimize},
    breaker::{check, evaluate, get_events, get_status, is_safe, resume, trigger},
    control::{pause, unpause},
    monitor::{health_check, ws_monitor},
    positions::get_positions,
    signals::{compute, get_history, get_scores, submit_score},
};
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("tradegate=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║              TRADEGATE — Decision Core                ║
  ║  Breaker · Aggregator · Paper Book · Backtest · Sweep ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config + shared state ──────────────────────────────────────────────
    let config = AppConfig::from_env();
    info!(
        symbols  = ?config.symbols,
        interval = ?config.monitor_interval,
        paused   = config.trading_paused,
        auth     = config.api_key.is_some(),
        "Configuration loaded"
    );
    if cfg!(not(feature = "postgres")) && config.database_url.is_some() {
        warn!("DATABASE_URL is set but tradegate was built without `--features postgres`; records stay in memory");
    }

    let state = build_state(config).await?;

    // ── 4. Monitor loop ───────────────────────────────────────────────────────
    match state.config.market_url.clone() {
        Some(url) => {
            let feed = HttpMarketFeed::new(state.http_client.clone(), url, state.config.market_timeout);
            tokio::spawn(run_monitor(state.clone(), feed));
        }
        None => warn!("MARKET_URL not set: monitor loop disabled, POST snapshots to /api/breaker/evaluate"),
    }

    // ── 5. CORS ───────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ── 6. Router ─────────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/api/health",             get(health_check))
        // ── Circuit Breaker ───────────────────────────────────────────────────
        .route("/api/breaker/status",     get(get_status))
        .route("/api/breaker/safe",       get(is_safe))
        .route("/api/breaker/evaluate",   post(evaluate))
        .route("/api/breaker/check",      post(check))
        .route("/api/breaker/trigger",    post(trigger))
        .route("/api/breaker/resume",     post(resume))
        .route("/api/breaker/events",     get(get_events))
        // ── Signals ───────────────────────────────────────────────────────────
        .route("/api/signals/scores",     post(submit_score).get(get_scores))
        .route("/api/signals/compute",    post(compute))
        .route("/api/signals/history",    get(get_history))
        // ── Paper Book / Control ──────────────────────────────────────────────
        .route("/api/positions",          get(get_positions))
        .route("/api/control/pause",      post(pause))
        .route("/api/control/unpause",    post(unpause))
        // ── Backtesting ───────────────────────────────────────────────────────
        .route("/api/backtest",           post(backtest))
        .route("/api/backtest/optimize",  post(optimize))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/ws/monitor",             get(ws_monitor))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    let addr: SocketAddr = state.config.bind_addr.parse()?;

    info!(?addr, "🚀 tradegate server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
