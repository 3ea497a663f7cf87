//! gatesyncd: the gatesync daemon.
//!
//! Keeps an edge node's deployments in sync with the control plane:
//! - applies change data events to the redb deployment store
//! - fetches, verifies and caches bundles
//! - serves the long-poll deployment API to gateway agents
//! - records agent outcomes and reports them upstream
//!
//! # Usage
//!
//! ```text
//! gatesyncd run --config /etc/gatesync.toml --events /var/run/gatesync/events.ndjson
//! tail -f changes.ndjson | gatesyncd run --events - --port 9090
//! ```

mod config;
mod daemon;
mod feed;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,gatesyncd=debug,gatesync=debug";

#[derive(Parser)]
#[command(name = "gatesyncd", about = "gatesync edge deployment daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Newline-delimited JSON sync events to apply; `-` reads stdin.
        #[arg(long)]
        events: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Print the effective configuration and exit.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args)]
struct Overrides {
    /// Path to gatesync.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Directory for the deployment store.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory verified bundles are cached in.
    #[arg(long)]
    bundle_dir: Option<PathBuf>,

    /// URL outcomes are reported to.
    #[arg(long)]
    status_url: Option<String>,
}

impl Overrides {
    fn resolve(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.store.data_dir = dir;
        }
        if let Some(dir) = self.bundle_dir {
            config.bundles.dir = dir;
        }
        if let Some(url) = self.status_url {
            config.upstream.status_url = Some(url);
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            overrides,
            events,
            log_json,
        } => {
            init_tracing(log_json);
            let config = overrides.resolve()?;
            daemon::run(config, events).await
        }
        Command::Config { overrides } => {
            print!("{}", overrides.resolve()?.to_toml_string()?);
            Ok(())
        }
    }
}
