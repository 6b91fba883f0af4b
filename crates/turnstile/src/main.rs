//! # Turnstile - join verification bot
//!
//! Challenges every member who joins a group with a two-button prompt,
//! keeps them read-only until they answer, and resolves each challenge
//! exactly once: correct answer, wrong answer, or timeout.
//!
//! ## Architecture
//! ```text
//! Bot API ──getUpdates──▶ ResponseRouter ──▶ Gatekeeper ──▶ ActionExecutor ──▶ Bot API
//!                                               ▲
//!                          TimerScheduler ──────┘ (timer dispatcher)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod executor;
mod platform;
mod router;
mod routes;
mod session;
mod state;
mod timer;
mod workers;

use crate::config::AppConfig;
use crate::executor::ActionExecutor;
use crate::platform::{Platform, TelegramClient};
use crate::router::ResponseRouter;
use crate::session::Gatekeeper;
use crate::state::AppState;

/// Turnstile - join verification bot
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/turnstile.toml")]
    config: String,

    /// Bot API token (overrides config)
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Listen address for health/metrics (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!(
        "🚪 Starting Turnstile v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Arc::new(AppConfig::load(&args.config, &args)?);
    info!(
        timeout_secs = config.challenge.timeout_secs,
        punishment = ?config.punishment,
        "📋 Configuration loaded from {}",
        args.config
    );

    // Platform client
    let client = Arc::new(
        TelegramClient::new(
            &config.api_base_url,
            config.bot_token.expose(),
            Duration::from_secs(config.poll_timeout_secs),
        )
        .context("Failed to build Bot API client")?,
    );
    let me = client
        .get_me()
        .await
        .context("Failed to reach Bot API (check the token)")?;
    info!(bot = ?me.username, id = me.id, "🤖 Authenticated");

    let platform: Arc<dyn Platform> = client.clone();

    // Session state machine
    let executor = ActionExecutor::new(platform.clone(), &config);
    let (gatekeeper, fired) = Gatekeeper::new(executor, config.challenge.timeout());
    let gatekeeper = Arc::new(gatekeeper);
    let router = Arc::new(ResponseRouter::new(
        gatekeeper.clone(),
        platform,
        config.notices.clone(),
    ));

    let state = AppState::new(config.clone(), gatekeeper.clone());

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Spawn background workers
    let timer_worker = tokio::spawn(workers::timer_dispatcher(
        gatekeeper,
        fired,
        shutdown_tx.subscribe(),
    ));
    let poll_worker = tokio::spawn(workers::update_poller(
        client,
        router,
        state.ready.clone(),
        shutdown_tx.subscribe(),
    ));

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Health endpoint listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    let _ = tokio::join!(timer_worker, poll_worker);

    info!("👋 Turnstile shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
