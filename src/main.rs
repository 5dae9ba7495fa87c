mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use agentcal_core::scheduler::DEFAULT_TICK_INTERVAL;
use agentcal_core::{
    CalendarService, EventStore, HorizonScheduler, Notifier, SystemClock,
};

use crate::state::AppState;

const DEFAULT_PORT: u16 = 4280;

fn db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AGENTCAL_DB") {
        return Ok(PathBuf::from(path));
    }
    let dir = dirs::data_dir()
        .context("no platform data directory")?
        .join("agentcal");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("agentcal.db"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agentcal=info,agentcal_core=info")),
        )
        .init();

    let store = Arc::new(EventStore::open(&db_path()?)?);
    let notifier = Arc::new(Notifier::new());
    let clock = Arc::new(SystemClock);

    let service = Arc::new(CalendarService::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        clock.clone(),
    ));

    // The one autonomous actor: keeps every series' forward window filled.
    let mut scheduler = HorizonScheduler::new(store, notifier, clock, DEFAULT_TICK_INTERVAL);
    scheduler.start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::calendars::router())
        .merge(routes::inbound::router())
        .with_state(AppState::new(service))
        .layer(cors);

    let port = std::env::var("AGENTCAL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("agentcal-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
