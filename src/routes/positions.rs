//! # routes::positions
//!
//! GET `/api/positions`: the live paper book, open positions and closed
//! trades, with balance and mark-to-market equity.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::SharedState;

/// GET /api/positions
pub async fn get_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let book = state.book.lock().await;
    let open: Vec<_> = book.open_positions().cloned().collect();
    let closed = book.closed_trades();

    Json(json!({
        "ok":           true,
        "paused":       state.is_paused(),
        "balance":      book.balance(),
        "equity":       book.equity(),
        "fees_paid":    book.fees_paid(),
        "config":       book.config(),
        "open_count":   open.len(),
        "open":         open,
        "closed_count": closed.len(),
        "closed":       closed,
    }))
}
