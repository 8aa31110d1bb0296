//! Command-line surface.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relaybridge_config::{BridgeSettings, parse_server_url};
use relaybridge_engine::RpcMethod;

#[derive(Debug, Parser)]
#[command(name = "relay-rpc")]
#[command(about = "Send RPC calls through a store-and-forward relay and track them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ~/.relaybridge/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Relay server base URL
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Originator address stamped on outgoing calls
    #[arg(long, global = true)]
    pub from: Option<String>,

    /// Directory holding the request store
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a call and wait for its result
    Send {
        /// syft://<recipient>/app_data/<app>/rpc/<endpoint>
        url: String,

        /// Request body; parsed as JSON, otherwise sent as a string
        #[arg(long)]
        body: Option<String>,

        #[arg(long, default_value = "POST", value_parser = RpcMethod::parse)]
        method: RpcMethod,

        /// Extra header as name=value (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Record the request and exit; `resume` sends it
        #[arg(long)]
        no_wait: bool,
    },

    /// List stored requests, most recent first
    List,

    /// Print one stored request
    Show { id: String },

    /// Finish every unfinished request
    Resume,

    /// Remove one request, or all of them
    Clear {
        id: Option<String>,

        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

impl Cli {
    /// Applies command-line overrides on top of resolved settings.
    pub fn apply(&self, mut settings: BridgeSettings) -> Result<BridgeSettings> {
        if let Some(server) = &self.server {
            settings.server_url = parse_server_url(server)?;
        }
        if let Some(from) = &self.from {
            settings.from.clone_from(from);
        }
        if let Some(dir) = &self.store_dir {
            settings.store_dir.clone_from(dir);
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}
