//! `taskhost config`

use std::path::Path;

use anyhow::{Context, Result};
use taskhost_config::TaskhostConfig;
use tracing::info;

use crate::cli::ConfigCommands;

pub fn handle(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Sample { output, force } => sample(output.as_deref(), *force),
    }
}

fn sample(output: Option<&Path>, force: bool) -> Result<()> {
    let sample = TaskhostConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        anyhow::bail!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write sample configuration to {:?}", output))?;

    info!("Sample configuration written to {:?}", output);
    Ok(())
}
