//! `healNow` (spec §4.9): triggers an out-of-cycle Auto-Heal sweep instead
//! of waiting for the monitor's periodic interval.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn heal_now(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.heal.sweep_once().await;
    Json(json!({ "status": "swept" }))
}
