#![cfg(unix)]
//! End-to-end invocations against generated `/bin/sh` workers

use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use taskhost_config::TaskConfig;
use taskhost_execution::*;
use tempfile::TempDir;

/// Write `body` as an executable worker script and return a task config for
/// it. Scripts stay writable, so the config allows that; the non-writable
/// case is covered by the safety tests.
fn worker(dir: &TempDir, body: &str) -> TaskConfig {
    let path = dir.path().join("worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    TaskConfig::new("test", "./worker.sh", dir.path())
        .allow_writable_executable(true)
        .with_watchdog(Duration::from_secs(5), Duration::from_millis(20))
}

async fn invoke(config: TaskConfig, payload: &str) -> TaskOutcome {
    let orchestrator = TaskOrchestrator::new(Arc::new(config));
    tokio::time::timeout(Duration::from_secs(20), orchestrator.invoke(payload))
        .await
        .expect("invocation did not finish")
}

#[tokio::test]
async fn test_result_then_exit_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
printf '%s\n' '["result","OK"]'
exit 0"#,
    );

    let outcome = invoke(config, "anything").await;
    assert_eq!(outcome.output(), Some("OK"));
}

#[tokio::test]
async fn test_silent_worker_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(&dir, "sleep 5").with_watchdog(
        Duration::from_millis(500),
        Duration::from_millis(20),
    );

    let started = std::time::Instant::now();
    let outcome = invoke(config, "anything").await;

    assert!(matches!(
        outcome,
        TaskOutcome::Failure(ExecutionError::TimeoutError(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_heartbeats_keep_worker_alive() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
i=0
while [ "$i" -lt 8 ]; do
  printf '%s\n' '["heartbeat"]'
  sleep 0.1
  i=$((i + 1))
done
printf '%s\n' '["result","done"]'"#,
    )
    .with_watchdog(Duration::from_millis(400), Duration::from_millis(20));

    let outcome = invoke(config, "anything").await;
    assert_eq!(outcome.output(), Some("done"));
}

#[tokio::test]
async fn test_payload_reaches_worker() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
case "$line" in
  '["message","ping"]') printf '%s\n' '["result","pong"]' ;;
  *) printf '%s\n' '["result","unexpected"]' ;;
esac"#,
    );

    let outcome = invoke(config, "ping").await;
    assert_eq!(outcome.output(), Some("pong"));
}

#[tokio::test]
async fn test_environment_and_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
printf '["result","%s|%s"]\n' "$TASKHOST_TEST_MODE" "$(pwd -P)""#,
    )
    .with_env("TASKHOST_TEST_MODE", "batch%%%ORIGINAL_VALUE%%%");

    let outcome = invoke(config, "anything").await;
    let work_dir = std::fs::canonicalize(dir.path()).unwrap();
    assert_eq!(
        outcome.output(),
        Some(format!("batch|{}", work_dir.display()).as_str())
    );
}

#[tokio::test]
async fn test_exit_without_result_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
printf 'garbage\n'
printf '%s\n' '["result"]'
exit 1"#,
    );

    let outcome = invoke(config, "anything").await;
    assert!(matches!(
        outcome,
        TaskOutcome::Failure(ExecutionError::StreamError(_))
    ));
    assert!(outcome.into_reply().output.is_none());
}

#[tokio::test]
async fn test_stderr_forwarding_does_not_disturb_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
echo "diagnostics" >&2
printf '%s\n' '["result","OK"]'"#,
    )
    .log_stderr(true);

    let outcome = invoke(config, "anything").await;
    assert_eq!(outcome.output(), Some("OK"));
}

#[tokio::test]
async fn test_send_fails_once_process_is_gone() {
    let mut child = tokio::process::Command::new("true")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();

    let watchdog = Watchdog::start(
        child,
        "gone",
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    let communicator = Communicator::start("gone", stdout, stdin, watchdog.heartbeat_handle());
    communicator.register_shutdown(&watchdog);

    watchdog.wait().await;
    assert!(!communicator.send_message("first"));
    assert!(!communicator.send_message("second"));
    assert!(communicator.result().get().await.failed);
}

#[tokio::test]
async fn test_slot_waits_for_process_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker(
        &dir,
        r#"read -r line
if [ -e busy ]; then
  printf '%s\n' '["result","overlap"]'
  exit 0
fi
touch busy
printf '%s\n' '["result","ok"]'
sleep 0.2
rm busy"#,
    );

    let pool = Arc::new(TaskPool::start(config));
    let requests: Vec<_> = (0..3)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit(format!("request {}", i)).await })
        })
        .collect();

    for request in requests {
        let outcome = request.await.unwrap().unwrap();
        assert_eq!(outcome.output(), Some("ok"));
    }
}

#[tokio::test]
async fn test_dispatcher_routes_by_task_name() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    let mut upper = worker(&first, r#"read -r line; printf '%s\n' '["result","upper"]'"#);
    upper.name = "upper".to_string();
    let mut lower = worker(&second, r#"read -r line; printf '%s\n' '["result","lower"]'"#);
    lower.name = "lower".to_string();

    let dispatcher = Dispatcher::new(vec![upper, lower]);

    let outcome = dispatcher.dispatch("lower", "x").await.unwrap();
    assert_eq!(outcome.output(), Some("lower"));
    let outcome = dispatcher.dispatch("upper", "x").await.unwrap();
    assert_eq!(outcome.output(), Some("upper"));
    assert!(matches!(
        dispatcher.dispatch("middle", "x").await,
        Err(DispatchError::UnknownTaskType(_))
    ));

    dispatcher.shutdown().await;
}
