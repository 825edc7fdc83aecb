use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use taskhost_config::{default_config_path, ConfigLoader, LogLevel, TaskhostConfig};
use taskhost_logging::{init_logging_from_config, init_simple_tracing};
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Load configuration from the given file or the default location
fn load_config(config_path: Option<&Path>) -> Result<TaskhostConfig> {
    let loader = ConfigLoader::new();
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !path.exists() {
        anyhow::bail!(
            "Configuration file not found: {:?}. Generate one with `taskhost config sample`.",
            path
        );
    }

    loader
        .from_file(&path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))
}

/// Load configuration and initialize logging, applying `--log-level`
fn prepare(cli: &Cli) -> Result<TaskhostConfig> {
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(level) = &cli.log_level {
        config.logging.level = level.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    init_logging_from_config(&config.logging)?;

    debug!(tasks = config.tasks.len(), "Configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Config { config_cmd } => {
            init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
            commands::config::handle(config_cmd)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let config = prepare(&cli)?;
            Ok(commands::check::run(&config))
        }
        Commands::Invoke {
            task,
            payload,
            payload_file,
        } => {
            let config = prepare(&cli)?;
            commands::invoke::run(&config, task, payload.clone(), payload_file.as_deref()).await
        }
        Commands::Serve => {
            let config = prepare(&cli)?;
            info!("taskhost {} starting", env!("CARGO_PKG_VERSION"));
            commands::serve::run(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
