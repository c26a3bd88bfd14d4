//! # routes::control
//!
//! | Method | Path                    | Description                           |
//! |--------|-------------------------|---------------------------------------|
//! | POST   | `/api/control/pause`    | stop entries and exits, keep signals  |
//! | POST   | `/api/control/unpause`  | resume trading on the next tick       |

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::SharedState;

/// POST /api/control/pause — หยุดเทรดชั่วคราว (ไม่เปิด ไม่ปิด position, signal ยังบันทึก)
pub async fn pause(State(state): State<SharedState>) -> impl IntoResponse {
    let changed = state.set_paused(true);
    Json(json!({ "ok": true, "paused": true, "changed": changed }))
}

/// POST /api/control/unpause
pub async fn unpause(State(state): State<SharedState>) -> impl IntoResponse {
    let changed = state.set_paused(false);
    Json(json!({ "ok": true, "paused": false, "changed": changed }))
}
