//! Request/response handlers.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::data::{Reading, StatusSnapshot};

/// Readings returned when no count is given.
pub const DEFAULT_READINGS_COUNT: usize = 10;

const DASHBOARD: &str = include_str!("dashboard.html");

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connected: bool,
}

/// Query string of `GET /api/readings`.
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    pub count: Option<usize>,
}

/// Static dashboard page.
pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}

/// Liveness check, also reporting whether the thermometer is linked.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected: state.store.is_connected(),
    })
}

/// Current status snapshot.
pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.store.snapshot_status())
}

/// Most recent readings, newest first.
pub async fn readings(
    State(state): State<AppState>,
    Query(query): Query<ReadingsQuery>,
) -> Json<Vec<Reading>> {
    Json(
        state
            .store
            .recent(query.count.unwrap_or(DEFAULT_READINGS_COUNT)),
    )
}
