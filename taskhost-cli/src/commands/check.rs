//! `taskhost check`

use std::process::ExitCode;

use taskhost_config::TaskhostConfig;
use taskhost_execution::SafetyChecker;
use tracing::{info, warn};

/// Print a safety report for every task type; non-zero exit if any fails
pub fn run(config: &TaskhostConfig) -> ExitCode {
    if config.tasks.is_empty() {
        println!("No task types configured");
        return ExitCode::SUCCESS;
    }

    let mut failed = 0;
    for task in &config.tasks {
        match SafetyChecker::check(task) {
            Ok(command) => {
                info!(task = %task.name, "Pre-conditions verified");
                println!("{}: ok ({})", task.name, command.executable.display());
            }
            Err(e) => {
                failed += 1;
                warn!(task = %task.name, "Pre-conditions failed");
                println!("{}: FAILED", task.name);
                for violation in &e.violations {
                    println!("  - {}", violation);
                }
            }
        }
    }

    if failed > 0 {
        println!("{} of {} task types failed", failed, config.tasks.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
