//! sosync command-line front-end
//!
//! `sosync run` drives a coordinator from an interactive console, `sosync
//! status` prints the persisted snapshot and `sosync reset` erases it.

mod config;
mod console;
mod logging;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use sosync_api_client::HttpEmergencyService;
use sosync_core::{
    CoordinatorBuilder, DeviceOrigin, EmergencyService, FileStore, InMemoryEmergencyService,
    ManualLocationSource, SnapshotStore,
};

use crate::config::CliConfig;
use crate::logging::{LoggingConfig, parse_log_level, setup_logging};

#[derive(Parser, Debug)]
#[command(name = "sosync", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/sosync/config.toml)
    #[arg(short, long, env = "SOSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the session snapshot and device id
    #[arg(long, env = "SOSYNC_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    #[arg(long, env = "SOSYNC_LOG", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long, global = true)]
    log_file_info: bool,

    /// Log span enter and exit
    #[arg(long, global = true)]
    log_spans: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn logging_config(&self) -> Result<LoggingConfig> {
        let mut logging = LoggingConfig::new(parse_log_level(&self.log_level)?);
        if self.json_logs {
            logging = logging.with_json();
        }
        if self.log_file_info {
            logging = logging.with_file_info();
        }
        if self.log_spans {
            logging = logging.with_spans();
        }
        Ok(logging)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the coordinator with an interactive console
    Run {
        /// Emergency API root URL
        #[arg(long, env = "SOSYNC_API_URL")]
        api_url: Option<String>,

        /// Bearer token for the emergency API
        #[arg(long, env = "SOSYNC_TOKEN", hide_env_values = true)]
        token: Option<String>,

        #[arg(long, env = "SOSYNC_USER_ID")]
        user_id: Option<i64>,

        /// PRIMARY or COMPANION
        #[arg(long)]
        origin: Option<DeviceOrigin>,

        /// Use an in-process backend instead of the HTTP API
        #[arg(long)]
        offline: bool,
    },
    /// Print the persisted session snapshot
    Status,
    /// Erase the persisted session snapshot
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = execute(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    setup_logging(cli.logging_config()?)?;

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = Some(dir);
    }

    match cli.command {
        Commands::Run {
            api_url,
            token,
            user_id,
            origin,
            offline,
        } => {
            if let Some(url) = api_url {
                config.api.base_url = url;
            }
            if token.is_some() {
                config.api.access_token = token;
            }
            if user_id.is_some() {
                config.coordinator.user_id = user_id;
            }
            if let Some(origin) = origin {
                config.coordinator.device_origin = origin;
            }
            run(config, offline).await
        }
        Commands::Status => status(&config).await,
        Commands::Reset => reset(&config).await,
    }
}

fn snapshot_store(config: &CliConfig) -> SnapshotStore {
    SnapshotStore::new(Arc::new(FileStore::new(config.state_dir())))
}

async fn run(mut config: CliConfig, offline: bool) -> Result<()> {
    let state_dir = config.state_dir();
    if config.coordinator.device_id.is_none() {
        config.coordinator.device_id = Some(config::device_id(&state_dir)?);
    }
    if config.coordinator.user_id.is_none() {
        bail!("no user id configured; pass --user-id or set coordinator.user_id");
    }

    let service: Arc<dyn EmergencyService> = if offline {
        warn!("Running against an in-process backend, nothing leaves this machine");
        Arc::new(InMemoryEmergencyService::new())
    } else {
        info!(base_url = %config.api.base_url, "Using emergency API");
        Arc::new(HttpEmergencyService::new(config.api.clone())?)
    };

    let location = ManualLocationSource::new();
    let handle = CoordinatorBuilder::new()
        .config(config.coordinator.clone())
        .service(service)
        .store(Arc::new(FileStore::new(&state_dir)))
        .location(Arc::new(location.clone()))
        .build()
        .await
        .context("Failed to start coordinator")?;

    console::run(handle.clone(), location).await?;
    handle.shutdown().await?;
    Ok(())
}

async fn status(config: &CliConfig) -> Result<()> {
    match snapshot_store(config).load().await? {
        Some((state, session)) => {
            println!("state: {}", state);
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        None => println!("no persisted session"),
    }
    Ok(())
}

async fn reset(config: &CliConfig) -> Result<()> {
    snapshot_store(config).clear().await?;
    println!("persisted session erased from {}", config.state_dir().display());
    Ok(())
}
