//! HTTP API routes.

mod routes;
mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db::Db;
use crate::live::LiveHandle;

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub live: LiveHandle,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_routes(&state.config))
        .route("/ws/{channel}", get(ws::channel_ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::live::LiveService;

    let config = Config::for_test(":memory:".into(), "test-admin-key");
    let db = Db::open_in_memory().unwrap();
    db.run_migrations(&config.migrations_dir).unwrap();
    let config = Arc::new(config);
    let db = Arc::new(db);
    let (live, _task) = LiveHandle::spawn(LiveService::new(config.clone(), db.clone()));
    AppState { db, live, config }
}
