use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;
use crate::ws::registry::RegistryStats;

/// Build the axum Router: the WebSocket endpoint plus health and stats.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Auth via query param, not an Authorization header
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(health_check))
        .route("/stats", get(hub_stats))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// GET /stats: live principal, connection and subscription counts.
async fn hub_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.hub.stats())
}
