//! Operational endpoints: liveness and the tool listing.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Json(json!({
        "status": "ok",
        "timestamp": timestamp,
        "activeSessions": state.sessions.active_count().await,
        "socketConnections": state.socket_connections.load(Ordering::Relaxed),
        "regions": state.sessions.regions().await,
    }))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .sessions
        .tools()
        .specs(None)
        .into_iter()
        .map(|spec| json!({"name": spec.name, "description": spec.description}))
        .collect();
    Json(json!({"tools": tools}))
}
