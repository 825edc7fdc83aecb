//! Error types for task execution

use std::time::Duration;

use thiserror::Error;

use crate::safety::SafetyError;

/// Why a single invocation produced no result
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The safety preflight rejected the task configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] SafetyError),

    /// The OS refused to start the worker
    #[error("Spawn error: {0}")]
    SpawnError(#[source] std::io::Error),

    /// The watchdog killed the worker before it delivered a result
    #[error("Timeout error: no heartbeat within {}s", .0.as_secs_f64())]
    TimeoutError(Duration),

    /// The worker's streams closed without a result
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Errors raised while routing a request to a task pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Task pool {0} is shut down")]
    PoolClosed(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = ExecutionError::TimeoutError(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timeout error: no heartbeat within 1.5s");
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::UnknownTaskType("resize".to_string());
        assert_eq!(err.to_string(), "Unknown task type: resize");
    }
}
