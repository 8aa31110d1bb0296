//! relay-rpc - command-line host for the relay bridge.
//!
//! # Architecture
//!
//! ```text
//! main() -> Cli::parse() -> BridgeSettings (file, env, flags)
//!                                |
//!                                v
//!             Bridge over FileStore -> commands::run() -> JSON on stdout
//! ```
//!
//! Logs never go to stdout. They are appended to `~/.relaybridge/logs/relaybridge.log`,
//! or written to stderr with `--verbose`.

mod args;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use relaybridge_config::{BridgeSettings, RelayBridgeConfig};
use relaybridge_engine::Bridge;
use relaybridge_store::FileStore;

use crate::args::Cli;

fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if verbose {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
        return;
    }

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the JSON result; without a log file, stay silent.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.relaybridge/logs/relaybridge.log
    if let Some(dir) = relaybridge_config::relaybridge_dir() {
        candidates.push(dir.join("logs").join("relaybridge.log"));
    }

    // Fallback: ./.relaybridge/logs/relaybridge.log
    candidates.push(
        PathBuf::from(".relaybridge")
            .join("logs")
            .join("relaybridge.log"),
    );

    candidates
}

fn load_settings(cli: &Cli) -> Result<BridgeSettings> {
    let config = match &cli.config {
        Some(path) => Some(RelayBridgeConfig::load_from(path)?),
        None => RelayBridgeConfig::load()?,
    };
    let settings = BridgeSettings::resolve(config.as_ref())?;
    cli.apply(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = load_settings(&cli).context("failed to load settings")?;
    let store = Arc::new(FileStore::new(settings.store_dir.clone()));
    tracing::debug!(
        server = %settings.server_url,
        store = %settings.store_dir.display(),
        "Opening bridge"
    );
    let bridge = Bridge::new(settings, store)?;

    let output = commands::run(&bridge, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
