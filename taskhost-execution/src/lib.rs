//! Worker process supervision for taskhost
//!
//! An invocation runs through these pieces in order:
//!
//! - [`SafetyChecker`] validates the executable and working directory
//! - the worker is spawned and handed to a [`Watchdog`], which kills it when
//!   heartbeats stop arriving
//! - a [`Communicator`] sends the payload and waits for the result line
//! - an optional [`StderrForwarder`] relays the worker's stderr to the log
//!
//! [`TaskOrchestrator`] wires these together for one slot, and
//! [`TaskPool`]/[`Dispatcher`] spread requests over the slots of each task
//! type.

pub mod communicator;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod result;
pub mod safety;
pub mod stderr;
pub mod watchdog;

pub use communicator::{Communicator, DRAIN_GRACE};
pub use error::{DispatchError, ExecutionError, ExecutionResult};
pub use orchestrator::{TaskOrchestrator, TaskOutcome};
pub use pool::{Dispatcher, TaskPool};
pub use result::{result_channel, ProcessResult, ResultFuture, ResultSetter};
pub use safety::{Access, SafetyChecker, SafetyError, VerifiedCommand, Violation};
pub use stderr::StderrForwarder;
pub use watchdog::{
    Deadline, Heartbeat, ProcessExit, ShutdownEvent, TerminationReason, Watchdog, WatchdogState,
};
