//! Destination snapshot administration.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::info;

use super::ApiError;
use crate::server::AppState;

/// `POST /api/servers/reload` — replaces the in-memory destination snapshot
/// with the current table contents, the alternative to restarting the
/// process after destination changes.
pub async fn reload_servers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let count = state.destinations.reload(&state.storage).await?;
    info!(server_count = count, "destination snapshot reloaded");
    Ok(Json(json!({ "status": "reloaded", "servers": count })))
}
