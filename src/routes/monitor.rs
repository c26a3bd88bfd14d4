//! # routes::monitor
//!
//! | Method    | Path          | Description                          |
//! |-----------|---------------|--------------------------------------|
//! | GET       | `/api/health` | liveness (never behind the API key)  |
//! | GET (WS)  | `/ws/monitor` | real-time `WsEvent` stream           |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::state::SharedState;

/// GET /api/health
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":      true,
        "service": "tradegate",
        "version": env!("CARGO_PKG_VERSION"),
        "breaker": state.breaker.state().await,
        "paused":  state.is_paused(),
        "symbols": state.config.symbols,
    }))
}

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket แล้ว subscribe broadcast channel
///
/// Dashboard ต่อที่ `ws://host:3000/ws/monitor`; ทุก `WsEvent` ส่งมาเป็น
/// JSON text frame
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── ส่ง Snapshot ปัจจุบันทันทีที่ต่อ ─────────────────────────────────────
    let snapshot = {
        let breaker = state.breaker.get_status().await;
        let (open, balance, equity) = {
            let book = state.book.lock().await;
            let open: Vec<_> = book.open_positions().cloned().collect();
            (open, book.balance(), book.equity())
        };
        let latest = state.recent_signals(None, state.config.symbols.len().max(1)).await;

        json!({
            "event":          "SNAPSHOT",
            "breaker":        breaker,
            "paused":         state.is_paused(),
            "open_positions": open,
            "balance":        balance,
            "equity":         equity,
            "latest_signals": latest,
        })
        .to_string()
    };

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return; // Client ปิดก่อน snapshot ส่งได้
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}
