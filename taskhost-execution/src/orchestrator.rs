//! Per-invocation supervision of one worker process

use std::process::Stdio;
use std::sync::Arc;

use taskhost_config::TaskConfig;
use taskhost_ipc::RpcReply;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::communicator::Communicator;
use crate::error::{ExecutionError, ExecutionResult};
use crate::result::ProcessResult;
use crate::safety::{SafetyChecker, SafetyError, VerifiedCommand};
use crate::stderr::StderrForwarder;
use crate::watchdog::{ProcessExit, TerminationReason, Watchdog};

/// Result of one invocation as seen by the transport
#[derive(Debug)]
pub enum TaskOutcome {
    Success(String),
    Failure(ExecutionError),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            TaskOutcome::Success(output) => Some(output),
            TaskOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            TaskOutcome::Success(_) => None,
            TaskOutcome::Failure(err) => Some(err),
        }
    }

    /// Reply envelope; failures carry no output
    pub fn into_reply(self) -> RpcReply {
        match self {
            TaskOutcome::Success(output) => RpcReply::success(output),
            TaskOutcome::Failure(_) => RpcReply::error(),
        }
    }
}

/// Runs invocations of one task type, one process at a time.
///
/// `invoke` returns only after the worker process has exited, so a slot
/// never has more than one live process.
pub struct TaskOrchestrator {
    config: Arc<TaskConfig>,
    slot: usize,
}

impl TaskOrchestrator {
    pub fn new(config: Arc<TaskConfig>) -> Self {
        Self { config, slot: 0 }
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = slot;
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn preflight(&self) -> Result<VerifiedCommand, SafetyError> {
        SafetyChecker::check(&self.config)
    }

    /// Run the worker once with `payload` and wait for it to exit
    pub async fn invoke(&self, payload: &str) -> TaskOutcome {
        let task = self.config.name.as_str();

        let command = match self.preflight() {
            Ok(command) => command,
            Err(e) => {
                warn!(task, slot = self.slot, "Pre-conditions failed, executable will not be run: {}", e);
                return TaskOutcome::Failure(e.into());
            }
        };

        info!(task, slot = self.slot, "Starting process");
        let mut child = match self.spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                warn!(task, slot = self.slot, "{}", e);
                return TaskOutcome::Failure(e);
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return TaskOutcome::Failure(ExecutionError::StreamError(
                "process stdio was not captured".to_string(),
            ));
        };
        let stderr = child.stderr.take();

        let watchdog = Watchdog::start(
            child,
            task,
            self.config.watchdog_timeout,
            self.config.check_interval,
        );
        let communicator = Communicator::start(task, stdout, stdin, watchdog.heartbeat_handle());
        communicator.register_shutdown(&watchdog);

        if let Some(stderr) = stderr {
            StderrForwarder::spawn(task, stderr);
        }

        if !communicator.send_message(payload) {
            warn!(task, slot = self.slot, "Failed to forward payload to process, terminating process");
            watchdog.terminate();
            let exit = watchdog.wait().await;
            debug!(task, slot = self.slot, status = ?exit.status, "Process shut down");
            return TaskOutcome::Failure(ExecutionError::StreamError(
                "payload could not be delivered to the process".to_string(),
            ));
        }

        let result = communicator.result().get().await;
        debug!(task, slot = self.slot, failed = result.failed, "Result resolved");

        let exit = watchdog.wait().await;
        info!(task, slot = self.slot, status = ?exit.status, reason = ?exit.reason, "Process shut down");

        self.outcome(result, exit)
    }

    fn spawn(&self, command: &VerifiedCommand) -> ExecutionResult<Child> {
        let stderr = if self.config.log_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        Command::new(&command.executable)
            .args(&command.args)
            .current_dir(&command.work_dir)
            .envs(self.config.resolved_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutionError::SpawnError)
    }

    fn outcome(&self, result: ProcessResult, exit: ProcessExit) -> TaskOutcome {
        match result {
            ProcessResult {
                output: Some(output),
                failed: false,
            } => TaskOutcome::Success(output),
            _ if exit.reason == TerminationReason::TimedOut => {
                TaskOutcome::Failure(ExecutionError::TimeoutError(self.config.watchdog_timeout))
            }
            _ => TaskOutcome::Failure(ExecutionError::StreamError(match exit.status {
                Some(status) => format!("process exited without a result ({})", status),
                None => "process exited without a result".to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskhost_ipc::ReplyState;

    #[test]
    fn test_outcome_into_reply() {
        let reply = TaskOutcome::Success("OK".to_string()).into_reply();
        assert_eq!(reply.state, ReplyState::Success);
        assert_eq!(reply.output.as_deref(), Some("OK"));

        let reply =
            TaskOutcome::Failure(ExecutionError::TimeoutError(Duration::from_secs(1))).into_reply();
        assert_eq!(reply.state, ReplyState::Error);
        assert!(reply.output.is_none());
    }

    #[tokio::test]
    async fn test_unsafe_config_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskConfig::new("missing", "./nope.sh", dir.path().join("gone"));
        let orchestrator = TaskOrchestrator::new(Arc::new(config)).with_slot(3);

        let outcome = orchestrator.invoke("payload").await;
        assert!(matches!(
            outcome.error(),
            Some(ExecutionError::ConfigurationError(_))
        ));
        assert!(outcome.output().is_none());
    }

    #[test]
    fn test_timeout_without_result_is_timeout_error() {
        let config = TaskConfig::new("t", "./worker", "/tmp")
            .with_watchdog(Duration::from_secs(2), Duration::from_millis(10));
        let orchestrator = TaskOrchestrator::new(Arc::new(config));

        let exit = ProcessExit {
            status: None,
            reason: TerminationReason::TimedOut,
        };
        let outcome = orchestrator.outcome(ProcessResult::failure(), exit);
        assert!(matches!(
            outcome,
            TaskOutcome::Failure(ExecutionError::TimeoutError(d)) if d == Duration::from_secs(2)
        ));

        let outcome = orchestrator.outcome(ProcessResult::success("late"), exit);
        assert_eq!(outcome.output(), Some("late"));
    }
}
