//! `taskhost invoke`

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use taskhost_config::TaskhostConfig;
use taskhost_execution::Dispatcher;

/// Run one invocation and print its reply envelope
pub async fn run(
    config: &TaskhostConfig,
    task: &str,
    payload: Option<String>,
    payload_file: Option<&Path>,
) -> Result<ExitCode> {
    let task_config = config
        .task(task)
        .with_context(|| format!("Task type '{}' is not configured", task))?;

    let payload = match (payload, payload_file) {
        (Some(payload), _) => payload,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload from {:?}", path))?,
        (None, None) => anyhow::bail!("No payload given"),
    };

    let dispatcher = Dispatcher::new([task_config.clone()]);
    let outcome = dispatcher.dispatch(task, payload).await?;
    dispatcher.shutdown().await;

    let success = outcome.is_success();
    let reply = outcome.into_reply();
    println!("{}", reply.to_json()?);

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
