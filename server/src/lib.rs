//! gdbox server: the axum app exposing the `/debugger` WebSocket event
//! channel and the checker REST endpoints, plus process bootstrap.

#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gdbox_core::checker::Checker;
use gdbox_core::checker::PackLoader;
use gdbox_core::config::Config;
use gdbox_core::results;
use gdbox_core::results::ResultRegistry;
use gdbox_core::session;
use gdbox_core::session::SessionRegistry;

pub mod checker_routes;
pub mod debugger;
pub mod events;
pub mod message_processor;

pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub results: Arc<ResultRegistry>,
    pub checker: Checker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debugger", get(debugger::ws_handler))
        .route("/checker/submit", post(checker_routes::submit))
        .route("/checker/status/{auth}", get(checker_routes::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_main() -> anyhow::Result<()> {
    // Colored leveled output on stderr; the level is controlled with
    // `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();

    let config = Arc::new(Config::load(Path::new("."))?);
    tokio::fs::create_dir_all(&config.received_dir).await?;
    tokio::fs::create_dir_all(&config.debug_dir).await?;
    tokio::fs::create_dir_all(&config.pack_dir).await?;

    let pack_loader = PackLoader::new(&config.pack_dir)?;
    info!("{} test pack(s) available", pack_loader.pack_count());

    let sessions = Arc::new(SessionRegistry::new());
    let results = Arc::new(ResultRegistry::new());
    let checker = Checker::spawn(&config, pack_loader);

    let _janitor = session::spawn_janitor(
        sessions.clone(),
        config.cleaning_unused_dbg_processes_time,
        config.receive_debug_ping_time,
    );
    let _sweeper = results::spawn_sweeper(
        results.clone(),
        config.cleaning_results_time,
        config.receive_submission_time,
    );

    let addr = format!("{}:{}", config.ip, config.port);
    let state = Arc::new(AppState {
        config,
        sessions,
        results,
        checker,
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server is running on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
