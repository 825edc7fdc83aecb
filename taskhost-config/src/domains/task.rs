//! Task type configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Placeholder in an environment override value that is replaced by the
/// variable's value in the supervisor's own environment.
pub const ORIGINAL_VALUE_PLACEHOLDER: &str = "%%%ORIGINAL_VALUE%%%";

/// One task type: the worker executable that handles it and how that worker
/// is supervised.
///
/// Immutable once loaded. `executable` and `work_dir` are only checked for
/// presence here; whether they are safe to run is decided right before each
/// spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task type selector
    pub name: String,

    /// Number of worker processes that may run at the same time
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Executable path, relative to `work_dir` (e.g. `./worker.sh`)
    #[serde(default)]
    pub executable: String,

    /// Working directory; the executable must live inside it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Arguments passed after the executable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment overrides, see [`ORIGINAL_VALUE_PLACEHOLDER`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Time without heartbeat after which the worker is killed
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_watchdog_timeout"
    )]
    pub watchdog_timeout: Duration,

    /// Watchdog polling interval
    #[serde(
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_check_interval"
    )]
    pub check_interval: Duration,

    /// Accept executables the current user can write to (development only)
    #[serde(default = "crate::domains::utils::default_false")]
    pub allow_writable_executable: bool,

    /// Forward worker stderr to the log
    #[serde(default = "crate::domains::utils::default_false")]
    pub log_stderr: bool,
}

impl TaskConfig {
    /// Create a task type with default supervision settings
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            concurrency_limit: default_concurrency_limit(),
            executable: executable.into(),
            work_dir: Some(work_dir.into()),
            args: Vec::new(),
            env: BTreeMap::new(),
            watchdog_timeout: default_watchdog_timeout(),
            check_interval: default_check_interval(),
            allow_writable_executable: false,
            log_stderr: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_watchdog(mut self, timeout: Duration, check_interval: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self.check_interval = check_interval;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn allow_writable_executable(mut self, allow: bool) -> Self {
        self.allow_writable_executable = allow;
        self
    }

    pub fn log_stderr(mut self, enabled: bool) -> Self {
        self.log_stderr = enabled;
        self
    }

    /// Command line as configured: executable followed by arguments.
    ///
    /// Empty when no executable is configured.
    pub fn command(&self) -> Vec<&str> {
        if self.executable.trim().is_empty() {
            return Vec::new();
        }
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Environment overrides with placeholders expanded against the
    /// supervisor's environment.
    pub fn resolved_env(&self) -> Vec<(String, String)> {
        self.resolve_env_with(|key| std::env::var(key).ok())
    }

    /// Environment overrides with placeholders expanded through `lookup`.
    /// A variable that `lookup` does not know expands to the empty string.
    pub fn resolve_env_with<F>(&self, lookup: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.env
            .iter()
            .map(|(key, value)| {
                let value = if value.contains(ORIGINAL_VALUE_PLACEHOLDER) {
                    let original = lookup(key).unwrap_or_default();
                    value.replace(ORIGINAL_VALUE_PLACEHOLDER, &original)
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }
}

impl Validatable for TaskConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.name, "name", self.domain_name())?;
        validate_positive(self.concurrency_limit, "concurrency_limit", self.domain_name())?;
        validate_positive(
            self.watchdog_timeout.as_millis(),
            "watchdog_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.check_interval.as_millis(),
            "check_interval",
            self.domain_name(),
        )?;

        if self.env.keys().any(|key| key.is_empty() || key.contains('=')) {
            return Err(self.validation_error(format!(
                "task '{}' has an invalid environment variable name",
                self.name
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "task"
    }
}

// Default value functions
fn default_concurrency_limit() -> usize {
    1
}

fn default_watchdog_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_check_interval() -> Duration {
    Duration::from_millis(200)
}
