//! Configuration domains

pub mod logging;
pub mod task;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::Validatable;

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskhostConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Task types, each served by its own pool of worker processes
    #[serde(default)]
    pub tasks: Vec<task::TaskConfig>,
}

impl TaskhostConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "task name '{}' is defined more than once",
                    task.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a task type by name
    pub fn task(&self, name: &str) -> Option<&task::TaskConfig> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = TaskhostConfig {
            logging: logging::LoggingConfig::default(),
            tasks: vec![task::TaskConfig::new(
                "example",
                "./worker.sh",
                "/srv/taskhost/example",
            )
            .with_args(["--verbose"])
            .with_env("PATH", "/srv/taskhost/bin:%%%ORIGINAL_VALUE%%%")
            .with_concurrency_limit(2)],
        };
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
