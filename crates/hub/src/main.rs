//! Live board hub: HTTP + WebSocket backend.
//!
//! Required env: ADMIN_API_KEY
//! Optional: HOST, PORT, DATABASE_PATH, MIGRATIONS_DIR, VOTING_DURATION_SECS,
//! HEARTBEAT_TIMEOUT_SECS, CONNECTION_QUEUE_CAPACITY, RECENT_LOG_CAPACITY,
//! RATE_LIMIT_ENABLED

use std::net::SocketAddr;
use std::sync::Arc;

use hub::{api, config, db, live};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;
    let config = Arc::new(config);

    let db = db::Db::open(&config.database_path)?;
    db.run_migrations(&config.migrations_dir)?;
    let db = Arc::new(db);

    let mut service = live::LiveService::new(config.clone(), db.clone());
    service.restore()?;
    let (live, _service_task) = live::LiveHandle::spawn(service);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let state = api::AppState { db, live, config };
    let app = api::router(state);

    tracing::info!("Hub listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
