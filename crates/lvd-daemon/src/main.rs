//! lvd-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, opens
//! the store, wires middleware, and starts the HTTP server.  All route
//! handlers live in `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use lvd_daemon::{routes, state};
use lvd_db::PgLifecycleStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Layered lowest-to-highest; missing files are skipped.
const CONFIG_PATHS: [&str; 2] = ["config/daemon.yaml", "config/daemon.local.yaml"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (cfg, loaded) = lvd_config::load_daemon_config(&CONFIG_PATHS)?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    let pool = lvd_db::connect_from_env(cfg.store.max_connections)
        .await
        .context("opening the bookings database")?;
    lvd_db::migrate(&pool).await.context("running migrations")?;
    let store = Arc::new(PgLifecycleStore::new(
        pool,
        Duration::from_millis(cfg.store.command_timeout_ms),
    ));

    let shared = Arc::new(state::AppState::new(store, cfg.pricing, cfg.feed.capacity));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {:?}", cfg.bind_addr))?;
    info!("lvd-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins (the operator console in dev).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
