//! Guaranteed teardown around a daemon's lifetime.
//!
//! [`InterruptScope::run`] starts a process, runs a body while the process
//! is up, and then always interrupts the process and waits for it to be
//! reaped, whether the body returned normally or panicked.
//!
//! ```rust,no_run
//! use soloist::{DaemonCommand, Elevation, FailureLog, HealthPoller, InterruptScope};
//! use soloist::PrivilegedProcessHandle;
//! use std::sync::Arc;
//!
//! # async fn example() -> soloist::Result<()> {
//! let failures = FailureLog::new();
//! let poller = HealthPoller::default();
//! let daemon = Arc::new(PrivilegedProcessHandle::new(
//!     DaemonCommand::new("/usr/local/bin/proxyd"),
//!     Elevation::Sudo,
//! ));
//!
//! let (poller, log) = (&poller, &failures);
//! let ready = InterruptScope::new(&failures)
//!     .run(daemon, move |_| poller.poll("http://httptarget", log))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Exit observation
//!
//! The blocking wait runs on its own task and hands its result back through
//! a one-shot channel. Teardown sends the interrupt first and only then
//! blocks on that channel, so a scope never returns before the process has
//! really exited. A wait that ends without reporting is recorded as
//! [`Error::ExitUnobserved`], never as a clean reap.
//!
//! # Cancellation
//!
//! A scope future dropped mid-flight interrupts the process from its drop
//! guard and schedules a kill for when the grace runs out. The spawned wait
//! keeps running and reaps the process.

use crate::failures::FailureLog;
use crate::process::PrivilegedProcessHandle;
use futures::FutureExt;
use soloist_core::{Error, ExitOutcome, Result};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long a cancelled scope waits after its interrupt before killing,
/// when the scope itself has no shutdown bound.
const CANCELLED_GRACE: Duration = Duration::from_secs(5);

/// Scoped execution block around a process's start/stop lifecycle.
#[derive(Debug, Clone)]
pub struct InterruptScope {
    failures: FailureLog,
    shutdown_grace: Option<Duration>,
}

impl InterruptScope {
    /// Creates a scope that reports into `failures` and waits indefinitely
    /// for the process to exit after the interrupt.
    pub fn new(failures: &FailureLog) -> Self {
        Self {
            failures: failures.clone(),
            shutdown_grace: None,
        }
    }

    /// Bounds the wait after the interrupt. When it elapses the process is
    /// killed and the scope keeps waiting until it is reaped.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Sets or clears the shutdown bound.
    pub fn with_shutdown_grace(mut self, grace: Option<Duration>) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Starts `handle`, runs `body`, then interrupts and reaps the process.
    ///
    /// If the process cannot be started the error is returned and `body` is
    /// not run. Failures observed during teardown are recorded in the
    /// scope's [`FailureLog`]. A panic in `body` is resumed after teardown.
    ///
    /// Dropping the returned future before it completes still interrupts the
    /// process, and kills it if it has not exited once the grace elapses.
    pub async fn run<F, Fut, T>(&self, handle: Arc<PrivilegedProcessHandle>, body: F) -> Result<T>
    where
        F: FnOnce(Arc<PrivilegedProcessHandle>) -> Fut,
        Fut: Future<Output = T>,
    {
        handle.start()?;
        let guard = ReapGuard::new(&handle, self.shutdown_grace.unwrap_or(CANCELLED_GRACE));
        let mut watch = ExitWatch::spawn(&handle);

        let body_handle = Arc::clone(&handle);
        let outcome = AssertUnwindSafe(async move { body(body_handle).await })
            .catch_unwind()
            .await;

        if outcome.is_err() {
            warn!(program = %handle.program_name(), "Scope body panicked, tearing down");
        }
        if let Err(e) = stop(&handle, &mut watch, self.shutdown_grace, &self.failures).await {
            self.failures.record(e);
        }
        guard.disarm();
        debug!(program = %handle.program_name(), "Daemon reaped");

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Free-function form of [`InterruptScope::run`] without a shutdown bound.
pub async fn run_scoped<F, Fut, T>(
    handle: Arc<PrivilegedProcessHandle>,
    failures: &FailureLog,
    body: F,
) -> Result<T>
where
    F: FnOnce(Arc<PrivilegedProcessHandle>) -> Fut,
    Fut: Future<Output = T>,
{
    InterruptScope::new(failures).run(handle, body).await
}

/// Result of a started process's wait, which runs on its own task.
pub(crate) struct ExitWatch {
    program: String,
    exited: oneshot::Receiver<Result<ExitOutcome>>,
}

impl ExitWatch {
    pub(crate) fn spawn(handle: &Arc<PrivilegedProcessHandle>) -> Self {
        let (tx, exited) = oneshot::channel();
        let waiter = Arc::clone(handle);
        tokio::spawn(async move {
            let _ = tx.send(waiter.wait().await);
        });
        Self {
            program: handle.program_name(),
            exited,
        }
    }

    /// Resolves once the process has been reaped.
    ///
    /// If the waiting task went away without reporting, the exit was never
    /// observed and [`Error::ExitUnobserved`] is returned.
    pub(crate) async fn exited(&mut self) -> Result<ExitOutcome> {
        match (&mut self.exited).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExitUnobserved {
                program: self.program.clone(),
            }),
        }
    }
}

/// Interrupts `handle` and waits for it to be reaped.
///
/// With a `grace`, a process still running once it elapses is killed, the
/// timeout is recorded, and the wait continues. Signal failures are recorded
/// in `failures`; the exit itself is returned.
pub(crate) async fn stop(
    handle: &PrivilegedProcessHandle,
    watch: &mut ExitWatch,
    grace: Option<Duration>,
    failures: &FailureLog,
) -> Result<ExitOutcome> {
    if let Err(e) = handle.interrupt() {
        failures.record(e);
    }

    let Some(grace) = grace else {
        return watch.exited().await;
    };

    match timeout(grace, watch.exited()).await {
        Ok(result) => result,
        Err(_) => {
            failures.record(Error::ShutdownTimeout {
                program: handle.program_name(),
                grace_ms: grace.as_millis() as u64,
            });
            if let Err(e) = handle.kill() {
                failures.record(e);
            }
            watch.exited().await
        }
    }
}

/// Stops a started process if dropped while still armed.
///
/// Covers futures that are cancelled between `start` and the end of their
/// own teardown, e.g. by a `timeout` or `select!` around a scenario.
pub(crate) struct ReapGuard {
    handle: Arc<PrivilegedProcessHandle>,
    grace: Duration,
    armed: bool,
}

impl ReapGuard {
    pub(crate) fn new(handle: &Arc<PrivilegedProcessHandle>, grace: Duration) -> Self {
        Self {
            handle: Arc::clone(handle),
            grace,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReapGuard {
    fn drop(&mut self) {
        if !self.armed || self.handle.status().is_exited() {
            return;
        }
        warn!(
            program = %self.handle.program_name(),
            pid = ?self.handle.pid(),
            "Cancelled before teardown finished, interrupting daemon"
        );
        let _ = self.handle.interrupt();

        // Without a runtime the pending wait is dropped with it, and the
        // child is killed on drop.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let handle = Arc::clone(&self.handle);
        let grace = self.grace;
        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if !handle.status().is_exited() {
                warn!(program = %handle.program_name(), "Daemon outlived cancelled scope, killing it");
                let _ = handle.kill();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DaemonCommand;
    use soloist_core::{Elevation, ExitOutcome, ProcessState};

    fn shell(script: &str) -> Arc<PrivilegedProcessHandle> {
        Arc::new(PrivilegedProcessHandle::new(
            DaemonCommand::new("/bin/sh").arg("-c").arg(script),
            Elevation::None,
        ))
    }

    #[tokio::test]
    async fn process_is_reaped_after_body_returns() {
        let failures = FailureLog::new();
        let handle = shell("trap 'exit 0' INT; while true; do sleep 0.05; done");

        let value = InterruptScope::new(&failures)
            .run(Arc::clone(&handle), |h| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                assert!(h.status().is_live());
                7
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(0)));
        assert!(failures.is_empty(), "{:?}", failures.messages());
    }

    #[tokio::test]
    async fn body_is_skipped_when_start_fails() {
        let failures = FailureLog::new();
        let handle = Arc::new(PrivilegedProcessHandle::new(
            DaemonCommand::new("/nonexistent/soloist-daemon"),
            Elevation::None,
        ));

        let mut ran = false;
        let result = run_scoped(handle, &failures, |_| {
            ran = true;
            async {}
        })
        .await;

        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
        assert!(!ran);
    }

    #[tokio::test]
    async fn early_exit_is_recorded_once_teardown_finishes() {
        let failures = FailureLog::new();
        let handle = shell("exit 4");

        run_scoped(Arc::clone(&handle), &failures, |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await
        .unwrap();

        assert_eq!(handle.status(), ProcessState::Exited(ExitOutcome::code(4)));
        assert!(failures.any(|e| matches!(e, Error::AbnormalExit { .. })));
        assert!(failures.any(|e| matches!(e, Error::SignalFailed { .. })));
    }

    #[tokio::test]
    async fn grace_escalates_to_kill() {
        let failures = FailureLog::new();
        let handle = shell("trap '' INT; while true; do sleep 0.05; done");

        InterruptScope::new(&failures)
            .shutdown_grace(Duration::from_millis(200))
            .run(Arc::clone(&handle), |_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
            })
            .await
            .unwrap();

        assert!(handle.status().is_exited());
        assert!(failures.any(|e| matches!(e, Error::ShutdownTimeout { .. })));
    }

    #[tokio::test]
    async fn lost_exit_report_is_an_error() {
        let (tx, exited) = oneshot::channel();
        drop(tx);
        let mut watch = ExitWatch {
            program: "proxyd".to_string(),
            exited,
        };

        match watch.exited().await {
            Err(Error::ExitUnobserved { program }) => assert_eq!(program, "proxyd"),
            other => panic!("expected unobserved exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_returns_the_observed_exit() {
        let failures = FailureLog::new();
        let handle = shell("trap 'exit 0' INT; while true; do sleep 0.05; done");
        handle.start().unwrap();
        let mut watch = ExitWatch::spawn(&handle);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = stop(&handle, &mut watch, Some(Duration::from_secs(5)), &failures)
            .await
            .unwrap();

        assert_eq!(outcome, ExitOutcome::code(0));
        assert!(failures.is_empty(), "{:?}", failures.messages());
    }

    #[tokio::test]
    async fn dropped_guard_interrupts_then_kills() {
        let handle = shell("trap '' INT; while true; do sleep 0.05; done");
        handle.start().unwrap();
        let mut watch = ExitWatch::spawn(&handle);
        tokio::time::sleep(Duration::from_millis(300)).await;

        drop(ReapGuard::new(&handle, Duration::from_millis(200)));

        let outcome = timeout(Duration::from_secs(5), watch.exited())
            .await
            .expect("guard never killed the process");
        match outcome {
            Err(Error::AbnormalExit { outcome, .. }) => {
                assert_eq!(outcome, ExitOutcome::signal(9));
            }
            other => panic!("expected kill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_process_alone() {
        let handle = shell("trap 'exit 0' INT; while true; do sleep 0.05; done");
        handle.start().unwrap();
        ReapGuard::new(&handle, Duration::from_millis(50)).disarm();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status(), ProcessState::Running);

        handle.kill().unwrap();
        let _ = handle.wait().await;
    }
}
