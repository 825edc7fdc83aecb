//! Task pools and request dispatch
//!
//! Every task type gets a [`TaskPool`] with `concurrency_limit` slots. A slot
//! takes the next request from the pool's queue only after the process of
//! its previous request has exited.

use std::collections::BTreeMap;
use std::sync::Arc;

use taskhost_config::{TaskConfig, TaskhostConfig};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::orchestrator::{TaskOrchestrator, TaskOutcome};
use crate::safety::{SafetyChecker, SafetyError, VerifiedCommand};

struct Request {
    payload: String,
    reply: oneshot::Sender<TaskOutcome>,
}

/// Fixed set of slots serving one task type
pub struct TaskPool {
    config: Arc<TaskConfig>,
    queue: mpsc::Sender<Request>,
    slots: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Start `concurrency_limit` slots. Must be called within a tokio runtime.
    pub fn start(config: TaskConfig) -> Self {
        let config = Arc::new(config);
        let slot_count = config.concurrency_limit.max(1);
        let (queue, receiver) = mpsc::channel(slot_count);
        let receiver = Arc::new(Mutex::new(receiver));

        let slots = (0..slot_count)
            .map(|slot| {
                let orchestrator = TaskOrchestrator::new(Arc::clone(&config)).with_slot(slot);
                tokio::spawn(run_slot(orchestrator, Arc::clone(&receiver)))
            })
            .collect();

        debug!(task = %config.name, slots = slot_count, "Task pool started");
        Self {
            config,
            queue,
            slots,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn preflight(&self) -> Result<VerifiedCommand, SafetyError> {
        SafetyChecker::check(&self.config)
    }

    /// Queue `payload` and wait for its outcome.
    ///
    /// Waits for a free queue position when every slot is busy.
    pub async fn submit(&self, payload: impl Into<String>) -> Result<TaskOutcome, DispatchError> {
        let (reply, outcome) = oneshot::channel();
        let request = Request {
            payload: payload.into(),
            reply,
        };

        self.queue
            .send(request)
            .await
            .map_err(|_| DispatchError::PoolClosed(self.config.name.clone()))?;
        outcome
            .await
            .map_err(|_| DispatchError::PoolClosed(self.config.name.clone()))
    }

    /// Stop accepting requests and wait for running invocations to finish
    pub async fn shutdown(self) {
        let TaskPool {
            config,
            queue,
            slots,
        } = self;
        drop(queue);

        for slot in slots {
            if let Err(e) = slot.await {
                warn!(task = %config.name, "Slot terminated abnormally: {}", e);
            }
        }
        debug!(task = %config.name, "Task pool stopped");
    }
}

async fn run_slot(orchestrator: TaskOrchestrator, queue: Arc<Mutex<mpsc::Receiver<Request>>>) {
    loop {
        let request = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(request) = request else {
            break;
        };

        let outcome = orchestrator.invoke(&request.payload).await;
        if request.reply.send(outcome).is_err() {
            debug!(task = %orchestrator.config().name, "Requester went away before the outcome was ready");
        }
    }
}

/// Routes requests to the pool of their task type
pub struct Dispatcher {
    pools: BTreeMap<String, TaskPool>,
}

impl Dispatcher {
    /// Start a pool per task type and log each preflight verdict.
    ///
    /// Task types that fail the preflight stay registered; their invocations
    /// fail until the configuration is corrected.
    pub fn new(tasks: impl IntoIterator<Item = TaskConfig>) -> Self {
        let pools = tasks
            .into_iter()
            .map(|config| {
                if config.allow_writable_executable {
                    warn!(
                        task = %config.name,
                        "Executable may be writable by the current user; this is unsafe outside of development"
                    );
                }

                let pool = TaskPool::start(config);
                match pool.preflight() {
                    Ok(command) => info!(
                        task = %pool.name(),
                        executable = %command.executable.display(),
                        "Pre-conditions verified"
                    ),
                    Err(e) => warn!(
                        task = %pool.name(),
                        "No execution will happen until these issues are fixed: {}",
                        e
                    ),
                }
                (pool.name().to_string(), pool)
            })
            .collect();

        Self { pools }
    }

    pub fn from_config(config: &TaskhostConfig) -> Self {
        Self::new(config.tasks.iter().cloned())
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn pool(&self, task: &str) -> Option<&TaskPool> {
        self.pools.get(task)
    }

    pub async fn dispatch(
        &self,
        task: &str,
        payload: impl Into<String>,
    ) -> Result<TaskOutcome, DispatchError> {
        let pool = self
            .pools
            .get(task)
            .ok_or_else(|| DispatchError::UnknownTaskType(task.to_string()))?;
        pool.submit(payload).await
    }

    /// Shut down every pool, waiting for running invocations
    pub async fn shutdown(self) {
        for pool in self.pools.into_values() {
            pool.shutdown().await;
        }
    }
}
