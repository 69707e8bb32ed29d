//! mail-gmail-autoreply-rs: Gmail auto-reply daemon
//!
//! Polls a Gmail mailbox for unread messages on a randomized interval and
//! replies once per thread, relying on the provider's own SENT marker to
//! avoid double replies across cycles. Replied messages are tagged with a
//! fixed label. All mailbox state lives at the provider; the daemon holds
//! no persistence of its own.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and CLI dispatch
//! - [`config`]: Environment-driven configuration for credentials and cadence
//! - [`errors`]: Application error model
//! - [`models`]: Gmail REST wire types
//! - [`oauth`]: Token refresh and the interactive authorization flow
//! - [`gmail`]: Provider client over the Gmail v1 API
//! - [`compose`]: Reply envelope construction and encoding
//! - [`cycle`]: Per-cycle reply decision loop
//! - [`scheduler`]: Randomized re-arming of the loop

mod compose;
mod config;
mod cycle;
mod errors;
mod gmail;
mod models;
mod oauth;
mod scheduler;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::BotConfig;
use errors::AppResult;
use gmail::GmailClient;
use scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "mail-gmail-autoreply-rs")]
#[command(about = "Gmail auto-reply daemon with randomized polling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auto-reply daemon (default)
    Run,
    /// Obtain a refresh token via the interactive browser consent flow
    Authorize,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and dispatches to
/// the daemon or the one-time authorization flow.
///
/// # Environment Variables
///
/// See [`BotConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_AUTOREPLY_CLIENT_ID=123.apps.googleusercontent.com \
/// MAIL_AUTOREPLY_CLIENT_SECRET=xxxx \
/// MAIL_AUTOREPLY_REFRESH_TOKEN=1//xxxx \
/// cargo run -- run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BotConfig::load_from_env()?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await?,
        Commands::Authorize => oauth::run_authorization(&config).await?,
    }
    Ok(())
}

/// Run the polling daemon until interrupted
///
/// The first cycle starts immediately; ctrl-c stops the process between
/// network calls of the current cycle or during the idle wait.
async fn run_daemon(config: BotConfig) -> AppResult<()> {
    let provider = GmailClient::from_config(&config)?;
    let mut scheduler = Scheduler::new(&config);
    info!(
        query = %config.search_query,
        label = %config.label_name,
        delay_min_ms = config.delay_min_ms,
        delay_max_ms = config.delay_max_ms,
        "auto-reply daemon started"
    );

    tokio::select! {
        _ = scheduler.run(&provider, &config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }
    Ok(())
}
