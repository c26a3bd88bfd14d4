//! # db — PostgreSQL Persistence
//!
//! Optional (`--features postgres`).  Uses runtime-checked `sqlx` queries so
//! the crate builds without a live database.
//!
//! ## Setup
//! 1. create a database and set `DATABASE_URL` in `.env`
//! 2. start the server; `migrations/001_init.sql` is applied on connect

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use tracing::info;

use crate::breaker::BreakerEvent;
use crate::models::{ExitReason, Position, Side, SignalRecord};

// ─── Pool Init ────────────────────────────────────────────────────────────────

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    run_migrations(&pool).await?;

    info!("✅ PostgreSQL connected and migrations applied");
    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    // simple-query protocol: the file holds several statements
    pool.execute(include_str!("../migrations/001_init.sql"))
        .await
        .context("Failed to run migration 001_init.sql")?;
    Ok(())
}

// ─── Signals ──────────────────────────────────────────────────────────────────

pub async fn insert_signal(pool: &PgPool, signal: &SignalRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO signals
          (ts, symbol, price, sources, weights, unified_score, action, confidence)
        VALUES ($1, $2, $3, $4::jsonb, $5::jsonb, $6, $7, $8)
        "#,
    )
    .bind(signal.timestamp)
    .bind(&signal.symbol)
    .bind(signal.price)
    .bind(serde_json::to_string(&signal.sources)?)
    .bind(serde_json::to_string(&signal.weights)?)
    .bind(signal.unified_score)
    .bind(signal.action.to_string())
    .bind(signal.confidence)
    .execute(pool)
    .await
    .context("insert_signal failed")?;

    Ok(())
}

// ─── Trades ───────────────────────────────────────────────────────────────────

pub async fn insert_trade(pool: &PgPool, position: &Position) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trades
          (trade_id, symbol, side, entry_price, quantity, stop_loss_price,
           take_profit_price, entry_ts, entry_fee, exit_price, exit_ts,
           exit_reason, exit_fee, realized_pnl)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(position.trade_id as i64)
    .bind(&position.symbol)
    .bind(match position.side {
        Side::Long  => "LONG",
        Side::Short => "SHORT",
    })
    .bind(position.entry_price)
    .bind(position.quantity)
    .bind(position.stop_loss_price)
    .bind(position.take_profit_price)
    .bind(position.entry_timestamp)
    .bind(position.entry_fee)
    .bind(position.exit_price)
    .bind(position.exit_timestamp)
    .bind(position.exit_reason.map(exit_reason_label))
    .bind(position.exit_fee)
    .bind(position.realized_pnl)
    .execute(pool)
    .await
    .context("insert_trade failed")?;

    Ok(())
}

fn exit_reason_label(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::StopLoss       => "STOP_LOSS",
        ExitReason::TakeProfit     => "TAKE_PROFIT",
        ExitReason::SignalFlip     => "SIGNAL_FLIP",
        ExitReason::CircuitBreaker => "CIRCUIT_BREAKER",
    }
}

// ─── Circuit Breaker Events ───────────────────────────────────────────────────

pub async fn insert_breaker_event(pool: &PgPool, event: &BreakerEvent) -> anyhow::Result<()> {
    let snapshot = event.snapshot.as_ref().map(serde_json::to_string).transpose()?;
    let actions = serde_json::to_string(&event.actions_taken)?;

    sqlx::query(
        r#"
        INSERT INTO circuit_breaker_events
          (event_id, kind, from_state, to_state, ts, message, snapshot,
           actions_taken, recovery_duration_minutes, capital_protected_usd)
        VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9, $10)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event.event_id)
    .bind(serde_json::to_string(&event.kind)?.trim_matches('"').to_string())
    .bind(event.from_state.to_string())
    .bind(event.to_state.to_string())
    .bind(event.timestamp)
    .bind(&event.message)
    .bind(snapshot)
    .bind(actions)
    .bind(event.recovery_duration_minutes)
    .bind(event.capital_protected_usd)
    .execute(pool)
    .await
    .context("insert_breaker_event failed")?;

    Ok(())
}
