//! Liveness watchdog for a single worker process
//!
//! The watchdog owns the [`Child`] and polls it every `check_interval`. Each
//! heartbeat pushes the deadline to `now + timeout`; once the deadline has
//! passed the process is killed, and the kill is repeated on every poll until
//! the process is confirmed dead. Shutdown callbacks run after that.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Point in time after which a silent process is considered hung
#[derive(Debug)]
pub struct Deadline {
    expires_at: Mutex<Instant>,
    timeout: Duration,
}

impl Deadline {
    pub fn starting_now(timeout: Duration) -> Self {
        Self {
            expires_at: Mutex::new(Instant::now() + timeout),
            timeout,
        }
    }

    /// Move the deadline to `now + timeout`. Never moves it backwards.
    pub fn extend(&self) {
        let next = Instant::now() + self.timeout;
        let mut expires_at = self.expires_at.lock();
        if next > *expires_at {
            *expires_at = next;
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > *self.expires_at.lock()
    }

    pub fn expires_at(&self) -> Instant {
        *self.expires_at.lock()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Cloneable handle that extends a watchdog's deadline
#[derive(Debug, Clone)]
pub struct Heartbeat {
    deadline: Arc<Deadline>,
}

impl Heartbeat {
    pub fn beat(&self) {
        self.deadline.extend();
    }
}

impl From<Arc<Deadline>> for Heartbeat {
    fn from(deadline: Arc<Deadline>) -> Self {
        Self { deadline }
    }
}

type ShutdownCallback = Box<dyn FnOnce() + Send + 'static>;

enum ShutdownState {
    Pending(Vec<ShutdownCallback>),
    Fired,
}

/// One-shot event with ordered subscribers.
///
/// Subscribers registered before [`fire`](Self::fire) run in registration
/// order; subscribers registered afterwards run immediately on the caller's
/// thread.
pub struct ShutdownEvent {
    state: Mutex<ShutdownState>,
}

impl ShutdownEvent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ShutdownState::Pending(Vec::new())),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        match &mut *state {
            ShutdownState::Pending(callbacks) => callbacks.push(Box::new(callback)),
            ShutdownState::Fired => {
                drop(state);
                run_callback(Box::new(callback));
            }
        }
    }

    /// Run all pending subscribers. Later calls do nothing.
    pub fn fire(&self) {
        let callbacks = match std::mem::replace(&mut *self.state.lock(), ShutdownState::Fired) {
            ShutdownState::Pending(callbacks) => callbacks,
            ShutdownState::Fired => return,
        };
        for callback in callbacks {
            run_callback(callback);
        }
    }

    pub fn has_fired(&self) -> bool {
        matches!(*self.state.lock(), ShutdownState::Fired)
    }
}

impl Default for ShutdownEvent {
    fn default() -> Self {
        Self::new()
    }
}

fn run_callback(callback: ShutdownCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!("Shutdown callback panicked");
    }
}

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Running,
    DeadlineExceeded,
    StillHanging,
    Terminated,
}

/// Why the supervised process is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Exited on its own
    Exited,
    /// Already gone when the watchdog started
    NotAliveAtStart,
    /// Killed after missing its deadline
    TimedOut,
    /// Killed through [`Watchdog::terminate`]
    Terminated,
}

/// Final state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the exit status could not be collected
    pub status: Option<ExitStatus>,
    pub reason: TerminationReason,
}

impl ProcessExit {
    pub fn was_killed(&self) -> bool {
        matches!(
            self.reason,
            TerminationReason::TimedOut | TerminationReason::Terminated
        )
    }
}

struct Shared {
    id: Uuid,
    name: String,
    pid: Option<u32>,
    deadline: Arc<Deadline>,
    shutdown: ShutdownEvent,
    state: Mutex<WatchdogState>,
    kill_requested: AtomicBool,
    kill: Notify,
    exit_tx: watch::Sender<Option<ProcessExit>>,
}

impl Shared {
    fn set_state(&self, state: WatchdogState) {
        *self.state.lock() = state;
    }
}

/// Supervises one worker process until it is confirmed dead
pub struct Watchdog {
    shared: Arc<Shared>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl Watchdog {
    /// Take ownership of `child` and start polling it.
    ///
    /// Starting counts as the first heartbeat. Must be called from within a
    /// tokio runtime.
    pub fn start(
        child: Child,
        name: impl Into<String>,
        timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        let (exit_tx, exit_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            name: name.into(),
            pid: child.id(),
            deadline: Arc::new(Deadline::starting_now(timeout)),
            shutdown: ShutdownEvent::new(),
            state: Mutex::new(WatchdogState::Running),
            kill_requested: AtomicBool::new(false),
            kill: Notify::new(),
            exit_tx,
        });

        debug!(
            watchdog = %shared.id,
            task = %shared.name,
            pid = ?shared.pid,
            timeout_ms = timeout.as_millis() as u64,
            "Starting watchdog"
        );
        tokio::spawn(poll(Arc::clone(&shared), child, check_interval));

        Self { shared, exit_rx }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    /// Extend the deadline; see [`Heartbeat`] for a handle usable elsewhere
    pub fn heartbeat(&self) {
        self.shared.deadline.extend();
    }

    pub fn heartbeat_handle(&self) -> Heartbeat {
        Heartbeat {
            deadline: Arc::clone(&self.shared.deadline),
        }
    }

    /// Run `callback` once the process is confirmed dead, or right away if it
    /// already is.
    pub fn add_shutdown_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.shutdown.subscribe(callback);
    }

    /// Kill the process without waiting for its deadline
    pub fn terminate(&self) {
        self.shared.kill_requested.store(true, Ordering::SeqCst);
        self.shared.kill.notify_one();
    }

    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    pub fn state(&self) -> WatchdogState {
        *self.shared.state.lock()
    }

    /// Wait until the process is confirmed dead
    pub async fn wait(&self) -> ProcessExit {
        let mut exit_rx = self.exit_rx.clone();
        let exit = match exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit.unwrap_or(ProcessExit {
            status: None,
            reason: TerminationReason::Exited,
        })
    }
}

/// What one poll cycle has to do about a process that is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PollAction {
    /// Set on the cycle that first decides to kill
    initiated: Option<TerminationReason>,
    /// Send a kill signal this cycle
    kill: bool,
    /// Log that the process survived its kill for another `timeout`
    warn_hang: bool,
}

/// Escalation from a missed deadline to repeated kills and hang warnings
struct Escalation {
    deadline: Arc<Deadline>,
    first_termination: Option<Instant>,
    last_hang_warning: Option<Instant>,
}

impl Escalation {
    fn new(deadline: Arc<Deadline>) -> Self {
        Self {
            deadline,
            first_termination: None,
            last_hang_warning: None,
        }
    }

    /// Decide what to do with a process observed alive at `now`.
    ///
    /// Once a kill has been decided it is repeated on every cycle. Hang
    /// warnings start at `first_termination + timeout` and repeat at most
    /// once per `timeout`.
    fn observe(&mut self, now: Instant, kill_requested: bool) -> PollAction {
        let mut action = PollAction::default();

        if self.first_termination.is_none() && (kill_requested || self.deadline.is_expired(now)) {
            self.first_termination = Some(now);
            action.initiated = Some(if kill_requested {
                TerminationReason::Terminated
            } else {
                TerminationReason::TimedOut
            });
        }

        let Some(first) = self.first_termination else {
            return action;
        };
        action.kill = true;

        let timeout = self.deadline.timeout();
        let warn_due = self
            .last_hang_warning
            .map_or(true, |last| now >= last + timeout);
        if now >= first + timeout && warn_due {
            self.last_hang_warning = Some(now);
            action.warn_hang = true;
        }
        action
    }

    /// Time between the first kill decision and `now`
    fn kill_duration(&self, now: Instant) -> Option<Duration> {
        self.first_termination
            .map(|first| now.saturating_duration_since(first))
    }
}

async fn poll(shared: Arc<Shared>, mut child: Child, check_interval: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        info!(
            watchdog = %shared.id,
            task = %shared.name,
            %status,
            "Process was not alive when the watchdog started"
        );
        finish(&shared, Some(status), TerminationReason::NotAliveAtStart, None);
        return;
    }

    let timeout = shared.deadline.timeout();
    let mut escalation = Escalation::new(Arc::clone(&shared.deadline));
    let mut reason = TerminationReason::Exited;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                warn!(watchdog = %shared.id, task = %shared.name, "Failed to poll process: {}", e);
            }
        }

        let kill_requested = shared.kill_requested.load(Ordering::SeqCst);
        let action = escalation.observe(Instant::now(), kill_requested);

        match action.initiated {
            Some(TerminationReason::Terminated) => {
                reason = TerminationReason::Terminated;
                shared.set_state(WatchdogState::DeadlineExceeded);
                info!(watchdog = %shared.id, task = %shared.name, "Terminating process on request");
            }
            Some(initiated) => {
                reason = initiated;
                shared.set_state(WatchdogState::DeadlineExceeded);
                warn!(
                    watchdog = %shared.id,
                    task = %shared.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "No heartbeat within timeout, killing process"
                );
            }
            None => {}
        }

        if action.warn_hang {
            shared.set_state(WatchdogState::StillHanging);
            warn!(
                watchdog = %shared.id,
                task = %shared.name,
                pid = ?shared.pid,
                "Process is still hanging after being killed"
            );
        }

        if action.kill {
            if let Err(e) = child.start_kill() {
                trace!(watchdog = %shared.id, "Kill request failed: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(check_interval) => {}
            _ = shared.kill.notified() => {}
        }
    };

    let kill_duration = escalation.kill_duration(Instant::now());
    finish(&shared, status, reason, kill_duration);
}

fn finish(
    shared: &Shared,
    status: Option<ExitStatus>,
    reason: TerminationReason,
    kill_duration: Option<Duration>,
) {
    shared.set_state(WatchdogState::Terminated);
    match (reason, kill_duration) {
        (TerminationReason::TimedOut, Some(elapsed)) => warn!(
            watchdog = %shared.id,
            task = %shared.name,
            status = ?status,
            kill_ms = elapsed.as_millis() as u64,
            "Timed out process terminated in {}ms",
            elapsed.as_millis()
        ),
        _ => debug!(
            watchdog = %shared.id,
            task = %shared.name,
            status = ?status,
            reason = ?reason,
            "Process confirmed dead"
        ),
    }
    // Callbacks first: once `wait` returns they have all run
    shared.shutdown.fire();
    shared.exit_tx.send_replace(Some(ProcessExit { status, reason }));
}
