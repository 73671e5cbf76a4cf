//! HTTP route definitions

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
    queue_size: usize,
    matches: Vec<MatchInfo>,
}

#[derive(Serialize)]
struct MatchInfo {
    id: String,
    players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaker.queue_size().await;

    let matches: Vec<MatchInfo> = state
        .registry
        .iter_handles()
        .into_iter()
        .map(|h| MatchInfo {
            players: h.player_count(),
            id: h.id,
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: matches.len(),
        active_players: state.registry.total_players(),
        queue_size,
        matches,
    })
}
