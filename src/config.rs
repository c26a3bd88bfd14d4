//! # config
//!
//! Typed runtime configuration read from the environment (after `.env` has
//! been loaded by `dotenvy` in `main`).  Every value has a default, so an
//! empty environment boots a local paper-trading instance.
//!
//! | Variable                | Default          |
//! |-------------------------|------------------|
//! | `BIND_ADDR`             | `0.0.0.0:3000`   |
//! | `API_KEY`               | unset (dev mode) |
//! | `SYMBOLS`               | `SUIUSDC`        |
//! | `MONITOR_INTERVAL_SECS` | `60`             |
//! | `MARKET_URL`            | unset (no loop)  |
//! | `MARKET_TIMEOUT_SECS`   | `10`             |
//! | `TRADING_PAUSED`        | `false`          |
//! | `LIVE_BALANCE`          | `10000`          |
//! | `DATABASE_URL`          | unset            |
//! | `BACKTEST_FEED_FILE`    | unset            |

use std::str::FromStr;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::engine::aggregator::AggregatorConfig;
use crate::engine::book::BookConfig;

// ─── Env helpers ──────────────────────────────────────────────────────────────

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn env_f64(key: &str, default: f64) -> f64 {
    env_parse(key, default)
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    env_parse(key, default)
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Ok(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// `None` when unset or blank.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr:        String,
    pub api_key:          Option<String>,
    pub symbols:          Vec<String>,
    pub monitor_interval: Duration,
    pub market_url:       Option<String>,
    pub market_timeout:   Duration,
    pub trading_paused:   bool,
    pub live_balance:     f64,
    pub database_url:     Option<String>,
    /// JSON array of feed ticks replayed when a backtest request brings none.
    pub backtest_feed:    Option<String>,
    pub aggregator:       AggregatorConfig,
    pub breaker:          BreakerConfig,
    pub book:             BookConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr:        "0.0.0.0:3000".to_string(),
            api_key:          None,
            symbols:          vec!["SUIUSDC".to_string()],
            monitor_interval: Duration::from_secs(60),
            market_url:       None,
            market_timeout:   Duration::from_secs(10),
            trading_paused:   false,
            live_balance:     10_000.0,
            database_url:     None,
            backtest_feed:    None,
            aggregator:       AggregatorConfig::default(),
            breaker:          BreakerConfig::default(),
            book:             BookConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let symbols = env_opt("SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .filter(|s| !s.is_empty())
            .unwrap_or(d.symbols);

        Self {
            bind_addr:        env_opt("BIND_ADDR").unwrap_or(d.bind_addr),
            api_key:          env_opt("API_KEY"),
            symbols,
            monitor_interval: Duration::from_secs(env_u64("MONITOR_INTERVAL_SECS", 60).max(1)),
            market_url:       env_opt("MARKET_URL"),
            market_timeout:   Duration::from_secs(env_u64("MARKET_TIMEOUT_SECS", 10).max(1)),
            trading_paused:   env_bool("TRADING_PAUSED", d.trading_paused),
            live_balance:     env_f64("LIVE_BALANCE", d.live_balance),
            database_url:     env_opt("DATABASE_URL"),
            backtest_feed:    env_opt("BACKTEST_FEED_FILE"),
            aggregator:       AggregatorConfig::from_env(),
            breaker:          BreakerConfig::from_env(),
            book:             book_from_env(d.book),
        }
    }
}

fn book_from_env(d: BookConfig) -> BookConfig {
    BookConfig {
        position_size_pct:   env_f64("LIVE_POSITION_SIZE_PCT", d.position_size_pct),
        leverage:            env_f64("LIVE_LEVERAGE", d.leverage),
        stop_loss_pct:       env_f64("LIVE_STOP_LOSS_PCT", d.stop_loss_pct),
        take_profit_pct:     env_f64("LIVE_TAKE_PROFIT_PCT", d.take_profit_pct),
        entry_fee_rate:      env_f64("LIVE_ENTRY_FEE_RATE", d.entry_fee_rate),
        exit_fee_rate:       env_f64("LIVE_EXIT_FEE_RATE", d.exit_fee_rate),
        flip_opens_opposite: env_bool("LIVE_FLIP_OPENS_OPPOSITE", d.flip_opens_opposite),
    }
}

/// Comma-separated, upper-cased, blanks and duplicates dropped.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sym in raw.split(',').map(|s| s.trim().to_ascii_uppercase()) {
        if !sym.is_empty() && !out.contains(&sym) {
            out.push(sym);
        }
    }
    out
}
