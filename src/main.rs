//! Application entry point for the `aqi-watch` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the store (PostgreSQL or SQLite) and creating the schema
//! - Starting the fetch scheduler and the SSE heartbeat
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving until SIGINT/SIGTERM, then shutting everything down in order
//!
//! # Environment Variables
//! See [`aqi_watch::config::load_from_env`] for the full list. Logging is
//! controlled by:
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//! - `FORCE_COLOR` (optional) – override TTY color detection
use std::{env, io::IsTerminal, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aqi_watch::auth::SharedSecretAuthenticator;
use aqi_watch::fanout::Fanout;
use aqi_watch::job::FetchJob;
use aqi_watch::overrides::OverrideState;
use aqi_watch::source::IqAirClient;
use aqi_watch::{config, routes, store, AppState};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = store::connect(&cfg.db_url, cfg.db_pool_max).await?;
    store.ping().await.context("database did not answer")?;
    tracing::info!("Successfully connected to database");

    let source = IqAirClient::new(&cfg.api_url, &cfg.api_key, cfg.source_timeout_secs)
        .context("failed to build IQAir client")?;
    let fanout = Fanout::new(cfg.subscriber_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat =
        fanout.spawn_heartbeat(Duration::from_secs(cfg.heartbeat_secs), shutdown_rx.clone());
    let scheduler = FetchJob::new(
        Arc::new(source),
        store.clone(),
        fanout.clone(),
        cfg.location.clone(),
        cfg.fetch_interval_secs,
    )
    .spawn(shutdown_rx);

    // Build app from routes gateway (EMBP)
    let state = AppState {
        store: store.clone(),
        overrides: Arc::new(OverrideState::new()),
        fanout: fanout.clone(),
        auth: Arc::new(SharedSecretAuthenticator::new(
            &cfg.admin_username,
            &cfg.admin_password,
            Duration::from_secs(cfg.admin_token_ttl_secs),
        )),
        default_city: cfg.location.city.clone(),
    };
    let app = routes::router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    // SSE streams never end on their own; close them when the signal arrives.
    let signal_fanout = fanout.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_fanout.close_all();
        })
        .await?;

    tracing::info!("HTTP server stopped, shutting down background tasks");
    shutdown_tx.send(true).ok();
    scheduler.await.ok();
    heartbeat.await.ok();
    fanout.close_all();
    store.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

// ---

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, or else the `AXUM_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
