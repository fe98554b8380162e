//! Integration tests for InterruptScope teardown on every exit path.

mod common;

use common::{FakeDaemon, OnConflict, shell};
use nix::sys::signal;
use nix::unistd::Pid;
use soloist::{Error, ExitOutcome, FailureLog, InterruptScope, ProcessState, run_scoped};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Normal Exit Paths
// =============================================================================

#[tokio::test]
async fn test_scope_releases_daemon_state() {
    let daemon = FakeDaemon::new(OnConflict::Refuse);
    let state = daemon.state_dir();
    let handle = Arc::new(daemon.handle());
    let failures = FailureLog::new();

    let held = run_scoped(Arc::clone(&handle), &failures, move |_| async move {
        for _ in 0..100 {
            if state.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    })
    .await
    .expect("Failed to run scope");

    assert!(held, "daemon never claimed its state");
    assert!(!daemon.state_dir().exists(), "state leaked past the scope");
    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(0)));
    assert!(failures.is_empty(), "{:?}", failures.messages());
}

#[tokio::test]
async fn test_scope_waits_for_slow_shutdown() {
    let handle = Arc::new(shell(
        "trap 'sleep 0.5; exit 0' INT; while true; do sleep 0.05; done",
    ));
    let failures = FailureLog::new();

    let started = Instant::now();
    run_scoped(Arc::clone(&handle), &failures, |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
    })
    .await
    .expect("Failed to run scope");

    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(0)));
    assert!(failures.is_empty(), "{:?}", failures.messages());
}

// =============================================================================
// Failure Paths
// =============================================================================

#[tokio::test]
async fn test_scope_reaps_after_body_panic() {
    let handle = Arc::new(shell("trap 'exit 0' INT; while true; do sleep 0.05; done"));
    let failures = FailureLog::new();

    let scoped = Arc::clone(&handle);
    let log = failures.clone();
    let joined = tokio::spawn(async move {
        run_scoped(scoped, &log, |_| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            panic!("assertion failed inside the scope");
        })
        .await
    })
    .await;

    assert!(joined.expect_err("body panic should propagate").is_panic());
    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(0)));
}

#[tokio::test]
async fn test_scope_reports_daemon_that_dies_early() {
    let handle = Arc::new(shell("exit 2"));
    let failures = FailureLog::new();

    run_scoped(Arc::clone(&handle), &failures, |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
    })
    .await
    .expect("Failed to run scope");

    assert!(failures.any(|e| matches!(
        e,
        Error::AbnormalExit { outcome, .. } if outcome.code == Some(2)
    )));
    assert!(failures.any(|e| matches!(e, Error::SignalFailed { .. })));
}

#[tokio::test]
async fn test_scope_reports_unclean_shutdown() {
    let handle = Arc::new(shell("trap 'exit 5' INT; while true; do sleep 0.05; done"));
    let failures = FailureLog::new();

    run_scoped(Arc::clone(&handle), &failures, |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
    })
    .await
    .expect("Failed to run scope");

    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(5)));
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn test_scope_skips_body_when_start_fails() {
    let handle = Arc::new(shell("true"));
    handle.start().expect("Failed to start");
    let failures = FailureLog::new();

    let result = run_scoped(Arc::clone(&handle), &failures, |_| async {
        panic!("body must not run");
    })
    .await;

    assert!(matches!(result, Err(Error::AlreadyStarted)));
    handle.wait().await.expect("Failed to wait");
}

#[tokio::test]
async fn test_scope_kills_daemon_that_ignores_interrupt() {
    let handle = Arc::new(shell("trap '' INT; while true; do sleep 0.05; done"));
    let failures = FailureLog::new();

    let started = Instant::now();
    InterruptScope::new(&failures)
        .shutdown_grace(Duration::from_millis(300))
        .run(Arc::clone(&handle), |_| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
        })
        .await
        .expect("Failed to run scope");

    assert!(started.elapsed() < Duration::from_secs(5));
    // SIGKILL
    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::signal(9)));
    assert!(failures.any(|e| matches!(e, Error::ShutdownTimeout { grace_ms: 300, .. })));
}

// =============================================================================
// Cancellation
// =============================================================================

async fn wait_for_exit(handle: &soloist::PrivilegedProcessHandle) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.status().is_exited() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_cancelled_scope_interrupts_daemon() {
    let daemon = FakeDaemon::new(OnConflict::Refuse);
    let handle = Arc::new(daemon.handle());
    let failures = FailureLog::new();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(300),
        run_scoped(Arc::clone(&handle), &failures, |_| {
            tokio::time::sleep(Duration::from_secs(60))
        }),
    )
    .await;
    assert!(cancelled.is_err(), "scope should still be running");

    let pid = handle.pid().expect("Daemon should have a pid");
    wait_for_exit(&handle).await;

    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(0)));
    assert!(
        signal::kill(Pid::from_raw(pid as i32), None).is_err(),
        "daemon outlived its scope"
    );
    assert!(!daemon.state_dir().exists(), "state leaked past the scope");
}

#[tokio::test]
async fn test_cancelled_scope_kills_daemon_that_ignores_interrupt() {
    let handle = Arc::new(shell("trap '' INT; while true; do sleep 0.05; done"));
    let failures = FailureLog::new();

    let scope = InterruptScope::new(&failures).shutdown_grace(Duration::from_millis(200));
    let cancelled = tokio::time::timeout(
        Duration::from_millis(300),
        scope.run(Arc::clone(&handle), |_| {
            tokio::time::sleep(Duration::from_secs(60))
        }),
    )
    .await;
    assert!(cancelled.is_err(), "scope should still be running");

    wait_for_exit(&handle).await;
    assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::signal(9)));
}
