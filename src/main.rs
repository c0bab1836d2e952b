mod bot;
mod config;
mod platform;
mod voice;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::UpdateDispatcher;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramAnswerer};

/// Updates buffered between the poller and the dispatcher
const UPDATE_QUEUE_CAPACITY: usize = 256;

/// Used when `RUST_LOG` is set neither in the environment nor in the env file
const DEFAULT_LOG_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info";

#[tokio::main]
async fn main() {
    // The env file may carry RUST_LOG, so it is loaded before logging starts
    let env_path = env_file_path();
    let env_loaded = load_env_file(&env_path);

    // Initialize logging
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Environment file: {}", env_path.display());
    let result = match env_loaded {
        Ok(()) => run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn env_file_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".env"))
}

/// Load the local env file; variables already set in the environment win
fn load_env_file(path: &Path) -> Result<()> {
    dotenvy::from_path(path)
        .with_context(|| format!("Error loading env file {}", path.display()))
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;

    info!("Configuration loaded successfully");
    info!("  Voice base URL: {}", config.voice.base_url);
    info!(
        "  Max concurrent answers: {}",
        config.dispatch.max_concurrent_answers
    );

    let bot = telegram::build_bot(&config.telegram)?;
    let username = telegram::authenticate(&bot).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
    let polling = tokio::spawn(telegram::run_polling(
        bot.clone(),
        config.telegram.polling_timeout,
        tx,
        shutdown.clone(),
    ));

    let dispatcher = UpdateDispatcher::new(
        Arc::new(TelegramAnswerer::new(bot)),
        &config.voice.base_url,
        config.dispatch.max_concurrent_answers,
    );

    info!("Bot started as @{}!", username);
    dispatcher.run(rx, shutdown.clone()).await;

    // Dispatcher exits on its own only if polling ended; make sure polling stops either way
    shutdown.cancel();
    polling.await.context("Polling task failed")?;

    info!("Bot stopped");
    Ok(())
}
