//! tetatet CLI entry point.
//!
//! Provides `start`, `reset` and `stats` subcommands for running the bot,
//! clearing moderation state, or printing aggregate statistics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{info, warn};

use tetatet::config::{load_config, runtime_paths, Config, RuntimePaths};
use tetatet::pairing::matcher::Matcher;
use tetatet::pairing::PairingQueue;
use tetatet::policy::ModeratorGate;
use tetatet::session::SessionEngine;
use tetatet::store::{SqliteStore, UserStore};
use tetatet::telegram::{run_telegram, TelegramNotifier};
use tetatet::types::UserId;

/// tetatet: anonymous one-on-one chat relay bot.
#[derive(Parser)]
#[command(name = "tetatet", version, about)]
struct Cli {
    /// Config file (defaults to `~/.tetatet/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the bot.
    Start,
    /// Clear every ban and report and return all users to the menu.
    Reset {
        /// Database file; overrides the config.
        #[arg(long)]
        database: Option<PathBuf>,
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Print aggregate statistics as JSON.
    Stats {
        /// Database file; overrides the config.
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start(cli.config).await,
        Command::Reset { database, yes } => handle_reset(cli.config, database, yes).await,
        Command::Stats { database } => handle_stats(cli.config, database).await,
    }
}

/// Load `.env` from beside the config file. A missing file is fine.
fn load_env_file(config_path: &Path) {
    let env_file = config_path
        .parent()
        .map_or_else(|| PathBuf::from(".env"), |dir| dir.join(".env"));
    match dotenvy::from_path(&env_file) {
        Ok(()) => {}
        Err(e) if e.not_found() => {}
        Err(e) => eprintln!("warning: failed to load {}: {e}", env_file.display()),
    }
}

fn resolve_config(paths: &RuntimePaths, explicit: Option<PathBuf>) -> anyhow::Result<Config> {
    let config_path = explicit.unwrap_or_else(|| paths.config_toml.clone());
    load_env_file(&config_path);
    load_config(&config_path).with_context(|| format!("failed to load {}", config_path.display()))
}

/// Database for one-shot commands: `--database` wins, else the config.
async fn open_store(
    config: Option<PathBuf>,
    database: Option<PathBuf>,
) -> anyhow::Result<SqliteStore> {
    let path = match database {
        Some(path) => path,
        None => {
            let paths = runtime_paths()?;
            resolve_config(&paths, config)?.database_path(&paths)
        }
    };
    SqliteStore::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))
}

/// Run the bot until Ctrl+C.
async fn handle_start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = runtime_paths()?;
    let config = resolve_config(&paths, config_path)?;

    // Set up production logging (JSON file + stderr).
    let _logging_guard = tetatet::logging::init_production(&paths.logs_dir)?;

    let token = config.bot_token()?;
    let database = config.database_path(&paths);
    let store: Arc<dyn UserStore> = Arc::new(SqliteStore::open(&database).await?);

    let bot = Bot::new(token);
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));
    let queue = Arc::new(PairingQueue::new());
    let gate = ModeratorGate::new(
        UserId(config.telegram.moderator_id),
        config.moderator_secret(),
    );
    let engine = Arc::new(SessionEngine::new(
        store,
        queue,
        notifier,
        config.policy.clone(),
        gate,
    ));

    engine
        .recover()
        .await
        .context("failed to restore session state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let matcher = Matcher::new(Arc::clone(&engine), &config.pairing).spawn(shutdown_rx);

    info!(
        database = %database.display(),
        moderator = config.telegram.moderator_id,
        "tetatet started"
    );

    let result = run_telegram(bot, engine).await;

    if shutdown_tx.send(true).is_err() {
        warn!("matcher already stopped");
    }
    if let Err(e) = matcher.await {
        warn!(error = %e, "matcher task failed");
    }

    info!("tetatet stopped");
    result
}

/// Clear bans and reports; every user goes back to the menu.
async fn handle_reset(
    config: Option<PathBuf>,
    database: Option<PathBuf>,
    yes: bool,
) -> anyhow::Result<()> {
    tetatet::logging::init_cli();
    if !yes {
        anyhow::bail!("reset deletes all bans and reports; re-run with --yes to confirm");
    }
    let store = open_store(config, database).await?;
    let summary = store.reset_all().await.context("reset failed")?;
    println!(
        "Removed {} ban(s) and {} report(s); {} user(s) returned to the menu.",
        summary.bans, summary.reports, summary.users
    );
    Ok(())
}

/// Print aggregate statistics as JSON.
async fn handle_stats(config: Option<PathBuf>, database: Option<PathBuf>) -> anyhow::Result<()> {
    tetatet::logging::init_cli();
    let store = open_store(config, database).await?;
    let stats = store
        .aggregate_stats(chrono::Utc::now())
        .await
        .context("failed to read stats")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
