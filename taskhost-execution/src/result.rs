//! Single-assignment result shared between the IPC reader and its waiters

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

/// What a worker process produced for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub output: Option<String>,
    pub failed: bool,
}

impl ProcessResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            failed: false,
        }
    }

    pub fn failure() -> Self {
        Self {
            output: None,
            failed: true,
        }
    }
}

/// Create a connected setter/future pair
pub fn result_channel() -> (ResultSetter, ResultFuture) {
    let (tx, rx) = watch::channel(None);
    (ResultSetter { tx: Arc::new(tx) }, ResultFuture { rx })
}

/// Write side. The first assignment wins; later ones are logged and dropped.
#[derive(Debug, Clone)]
pub struct ResultSetter {
    tx: Arc<watch::Sender<Option<ProcessResult>>>,
}

impl ResultSetter {
    /// Returns whether this call resolved the result
    pub fn set(&self, result: ProcessResult) -> bool {
        self.tx.send_if_modified(|slot| match slot {
            None => {
                *slot = Some(result);
                true
            }
            Some(existing) => {
                warn!(?existing, discarded = ?result, "Result already set, discarding");
                false
            }
        })
    }

    /// Resolve as failed unless a result is already present
    pub fn fail_if_unset(&self) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(ProcessResult::failure());
            true
        })
    }
}

/// Read side; cloneable, every clone observes the same value
#[derive(Debug, Clone)]
pub struct ResultFuture {
    rx: watch::Receiver<Option<ProcessResult>>,
}

impl ResultFuture {
    /// Wait for the result.
    ///
    /// Resolves as failed if every setter is dropped without assigning.
    pub async fn get(&self) -> ProcessResult {
        let mut rx = self.rx.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(ProcessResult::failure)
    }

    /// Like [`get`](Self::get), giving up after `timeout`
    pub async fn get_timeout(&self, timeout: Duration) -> Option<ProcessResult> {
        tokio::time::timeout(timeout, self.get()).await.ok()
    }

    /// Current value without waiting
    pub fn try_get(&self) -> Option<ProcessResult> {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_assignment_wins() {
        let (setter, future) = result_channel();
        assert!(future.try_get().is_none());

        assert!(setter.set(ProcessResult::success("first")));
        assert!(!setter.set(ProcessResult::success("second")));
        assert!(!setter.fail_if_unset());

        assert_eq!(future.get().await, ProcessResult::success("first"));
        assert_eq!(future.try_get(), Some(ProcessResult::success("first")));
    }

    #[tokio::test]
    async fn test_all_waiters_see_same_value() {
        let (setter, future) = result_channel();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let future = future.clone();
                tokio::spawn(async move { future.get().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(setter.fail_if_unset());

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), ProcessResult::failure());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_timeout_without_value() {
        let (_setter, future) = result_channel();
        assert!(future
            .get_timeout(Duration::from_millis(100))
            .await
            .is_none());
        assert!(!future.is_ready());
    }

    #[tokio::test]
    async fn test_dropped_setter_resolves_failed() {
        let (setter, future) = result_channel();
        drop(setter);
        assert_eq!(future.get().await, ProcessResult::failure());
    }
}
