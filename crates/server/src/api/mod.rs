pub mod activity;
pub mod config;
pub mod sync;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/run", get(sync::start_run))
        .route("/stop", post(sync::stop_run))
        .route("/state", get(sync::get_state))
        .route("/history", get(sync::get_history))
        .route("/config", get(config::get_config).post(config::update_config))
        .route(
            "/activity",
            get(activity::list_activity).delete(activity::clear_activity),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
