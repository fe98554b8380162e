//! End-to-end scenarios composed from the lock-free building blocks.
//!
//! A scenario owns its process handles. It runs the primary daemon inside an
//! [`InterruptScope`], so the daemon is reaped before [`Scenario::run`]
//! returns whatever the outcome.

use crate::failures::FailureLog;
use crate::poller::HealthPoller;
use crate::process::PrivilegedProcessHandle;
use crate::scope::{ExitWatch, InterruptScope, ReapGuard, stop};
use async_trait::async_trait;
use soloist_core::{Error, ExitOutcome, HarnessConfig, ProbeResult, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What happened to the duplicate launch. Kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateOutcome {
    /// The duplicate ran and exited, successfully or not.
    Exited(ExitOutcome),
    /// The duplicate could not be run at all.
    Rejected(String),
    /// The duplicate was still running when its time ran out and was stopped.
    TimedOut { after_ms: u64 },
}

impl DuplicateOutcome {
    fn from_run(result: Result<ExitOutcome>) -> Self {
        match result {
            Ok(outcome) => DuplicateOutcome::Exited(outcome),
            Err(Error::AbnormalExit { outcome, .. }) => DuplicateOutcome::Exited(outcome),
            Err(e) => DuplicateOutcome::Rejected(e.to_string()),
        }
    }
}

impl fmt::Display for DuplicateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateOutcome::Exited(outcome) => write!(f, "{outcome}"),
            DuplicateOutcome::Rejected(reason) => write!(f, "rejected: {reason}"),
            DuplicateOutcome::TimedOut { after_ms } => {
                write!(f, "still running after {after_ms}ms")
            }
        }
    }
}

/// Observations from one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: &'static str,
    /// Whether the target answered 200 within the poll budget.
    pub ready: bool,
    pub duplicate: Option<DuplicateOutcome>,
}

/// A runnable scenario.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the scenario, recording every failure in `failures`.
    ///
    /// An `Err` is returned only when the primary daemon could not be
    /// started; everything else lands in the log.
    async fn run(&self, failures: &FailureLog) -> Result<ScenarioReport>;

    /// Runs with a fresh log and folds the log into the result.
    async fn execute(&self) -> Result<ScenarioReport> {
        let failures = FailureLog::new();
        let report = self.run(&failures).await;
        failures.finish(self.name())?;
        report
    }
}

/// Starts the daemon and checks that its target becomes ready.
pub struct SmokeScenario {
    primary: Arc<PrivilegedProcessHandle>,
    target_url: String,
    poller: HealthPoller,
    shutdown_grace: Option<Duration>,
}

impl SmokeScenario {
    pub fn new(
        primary: PrivilegedProcessHandle,
        target_url: impl Into<String>,
        poller: HealthPoller,
    ) -> Self {
        Self {
            primary: Arc::new(primary),
            target_url: target_url.into(),
            poller,
            shutdown_grace: None,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            PrivilegedProcessHandle::for_daemon(&config.daemon, &config.cluster.kubeconfig),
            config.target_url.clone(),
            HealthPoller::from_config(&config.poll),
        )
        .with_shutdown_grace(config.shutdown_grace())
    }

    pub fn shutdown_grace(self, grace: Duration) -> Self {
        self.with_shutdown_grace(Some(grace))
    }

    pub fn with_shutdown_grace(mut self, grace: Option<Duration>) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[async_trait]
impl Scenario for SmokeScenario {
    fn name(&self) -> &'static str {
        "smoke"
    }

    async fn run(&self, failures: &FailureLog) -> Result<ScenarioReport> {
        let url = self.target_url.as_str();
        let poller = &self.poller;

        let ready = InterruptScope::new(failures)
            .with_shutdown_grace(self.shutdown_grace)
            .run(Arc::clone(&self.primary), move |_| poller.poll(url, failures))
            .await?;

        Ok(ScenarioReport {
            name: self.name(),
            ready,
            duplicate: None,
        })
    }
}

/// Checks that launching a second daemon leaves the first one serving.
///
/// Once the primary is ready the duplicate is launched outside any scope and
/// given until the duplicate timeout (the poll budget unless set) to exit.
/// Its exit status is logged and reported but never asserted. A duplicate
/// that is still running by then is stopped and recorded as
/// [`Error::DuplicateStillRunning`]. The target is then probed exactly once:
///
/// | probe result      | recorded error                        |
/// |-------------------|---------------------------------------|
/// | 200               | none                                  |
/// | other status      | [`Error::DuplicateDegradedPrimary`]   |
/// | transport failure | [`Error::DuplicateKilledPrimary`]     |
pub struct SingletonInvariantScenario {
    primary: Arc<PrivilegedProcessHandle>,
    duplicate: Arc<PrivilegedProcessHandle>,
    target_url: String,
    duplicate_timeout: Duration,
    poller: HealthPoller,
    shutdown_grace: Option<Duration>,
}

impl SingletonInvariantScenario {
    pub fn new(
        primary: PrivilegedProcessHandle,
        duplicate: PrivilegedProcessHandle,
        target_url: impl Into<String>,
        poller: HealthPoller,
    ) -> Self {
        Self {
            primary: Arc::new(primary),
            duplicate: Arc::new(duplicate),
            target_url: target_url.into(),
            duplicate_timeout: poller.time_budget(),
            poller,
            shutdown_grace: None,
        }
    }

    /// Builds both handles from the same daemon configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let handle =
            || PrivilegedProcessHandle::for_daemon(&config.daemon, &config.cluster.kubeconfig);
        Self::new(
            handle(),
            handle(),
            config.target_url.clone(),
            HealthPoller::from_config(&config.poll),
        )
        .with_shutdown_grace(config.shutdown_grace())
    }

    pub fn shutdown_grace(self, grace: Duration) -> Self {
        self.with_shutdown_grace(Some(grace))
    }

    pub fn with_shutdown_grace(mut self, grace: Option<Duration>) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// How long the duplicate may run before it is stopped.
    pub fn duplicate_timeout(mut self, limit: Duration) -> Self {
        self.duplicate_timeout = limit;
        self
    }

    async fn launch_duplicate(&self, failures: &FailureLog) -> DuplicateOutcome {
        let duplicate = &self.duplicate;
        info!(program = %duplicate.program_name(), "Launching duplicate daemon");
        if let Err(e) = duplicate.start() {
            return DuplicateOutcome::Rejected(e.to_string());
        }

        let grace = self.shutdown_grace.unwrap_or(self.duplicate_timeout);
        let guard = ReapGuard::new(duplicate, grace);
        let mut watch = ExitWatch::spawn(duplicate);

        let outcome = match timeout(self.duplicate_timeout, watch.exited()).await {
            Ok(result) => DuplicateOutcome::from_run(result),
            Err(_) => {
                let after_ms = self.duplicate_timeout.as_millis() as u64;
                warn!(
                    program = %duplicate.program_name(),
                    after_ms,
                    "Duplicate daemon is still running, stopping it"
                );
                failures.record(Error::DuplicateStillRunning {
                    program: duplicate.program_name(),
                    after_ms,
                });
                let stopped = stop(duplicate, &mut watch, Some(grace), failures).await;
                debug!(result = ?stopped, "Duplicate daemon stopped");
                DuplicateOutcome::TimedOut { after_ms }
            }
        };
        guard.disarm();
        outcome
    }

    async fn contend(&self, failures: &FailureLog) -> (bool, Option<DuplicateOutcome>) {
        let url = self.target_url.as_str();
        if !self.poller.poll(url, failures).await {
            return (false, None);
        }

        let duplicate = self.launch_duplicate(failures).await;
        info!(outcome = %duplicate, "Duplicate daemon finished");

        match self.poller.probe(url).await {
            ProbeResult::Ready => info!(url, "Primary survived duplicate launch"),
            ProbeResult::NotReady { status } => {
                warn!(url, status, "Primary degraded after duplicate launch");
                failures.record(Error::DuplicateDegradedPrimary { status });
            }
            ProbeResult::Unreachable { reason } => {
                warn!(url, %reason, "Primary unreachable after duplicate launch");
                failures.record(Error::DuplicateKilledPrimary(reason));
            }
        }

        (true, Some(duplicate))
    }
}

#[async_trait]
impl Scenario for SingletonInvariantScenario {
    fn name(&self) -> &'static str {
        "already-running"
    }

    async fn run(&self, failures: &FailureLog) -> Result<ScenarioReport> {
        let (ready, duplicate) = InterruptScope::new(failures)
            .with_shutdown_grace(self.shutdown_grace)
            .run(Arc::clone(&self.primary), move |_| self.contend(failures))
            .await?;

        Ok(ScenarioReport {
            name: self.name(),
            ready,
            duplicate,
        })
    }
}
