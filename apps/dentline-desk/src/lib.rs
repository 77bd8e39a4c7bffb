//! Dentline Desk: the room relay that forwards call signaling between the
//! participants of a consultation.

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod rooms;
pub mod ws;

pub use config::Config;
pub use ws::DeskState;

/// Build the relay router over the given state. Exposed so tests can mount
/// the relay in-process.
pub fn router(state: DeskState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Router with fresh state, for the common single-instance case.
pub fn app() -> Router {
    router(DeskState::new())
}

async fn health_check() -> &'static str {
    "ok"
}
