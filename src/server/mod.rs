pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/expirations", get(routes::get_expirations))
        .route("/api/session", post(routes::load_session))
        .route("/api/session/csv", post(routes::load_session_csv))
        .route("/api/archive", get(routes::list_archive))
        .route("/api/archive/{id}/session", post(routes::reopen_archive))
        .route("/api/params", put(routes::put_params))
        .route("/api/payoffs", get(routes::get_payoffs))
        .route("/api/payoffs.csv", get(routes::get_payoffs_csv))
        .route("/api/chain.csv", get(routes::get_chain_csv))
        .route("/api/daily-changes", get(routes::get_daily_changes))
        .route("/api/earnings", get(routes::get_earnings))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
