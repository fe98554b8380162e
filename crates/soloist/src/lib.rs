//! Supervision harness for a privileged, singleton network daemon.
//!
//! Soloist launches a daemon that claims exclusive host network state, waits
//! for it to serve traffic, and checks that a second instance started on top
//! of it cannot take that service down. It is built for integration test
//! suites that share one expensive cluster across runs.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use soloist::{Harness, HarnessConfig, ScenarioKind};
//!
//! # async fn example() -> soloist::Result<()> {
//! let config = HarnessConfig::new("/usr/local/bin/proxyd", "build-aux/cluster.knaut");
//! let harness = Harness::new(config)?;
//!
//! let summary = harness.run(&ScenarioKind::ALL).await?;
//! std::process::exit(summary.exit_code());
//! # }
//! ```
//!
//! # Building blocks
//!
//! - [`ResourceLock`] serializes whole runs across processes.
//! - [`HealthPoller`] waits for the daemon's endpoint to answer 200.
//! - [`PrivilegedProcessHandle`] is one elevated daemon process.
//! - [`InterruptScope`] starts a handle, runs a body, and always interrupts
//!   and reaps the process afterwards.
//! - [`SmokeScenario`] and [`SingletonInvariantScenario`] compose the above.

mod cluster;
mod environment;
mod failures;
mod harness;
mod lock;
mod poller;
mod process;
mod scenario;
mod scope;

pub use cluster::{ClusterProvisioner, ClusterResource, KubectlProvisioner};
pub use environment::{Environment, ToolStatus};
pub use failures::FailureLog;
pub use harness::{Harness, RunSummary, ScenarioKind, ScenarioOutcome};
pub use lock::{
    LockToken, MachineLock, NoopLock, ProcessLock, ResourceLock, acquire_async,
    with_exclusive_access,
};
pub use poller::HealthPoller;
pub use process::{DaemonCommand, PrivilegedProcessHandle};
pub use scenario::{
    DuplicateOutcome, Scenario, ScenarioReport, SingletonInvariantScenario, SmokeScenario,
};
pub use scope::{InterruptScope, run_scoped};

/// Version of the harness library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub use soloist_core::VERSION as CORE_VERSION;

pub use soloist_core::{
    ClusterConfig, DEFAULT_TARGET_URL, DaemonConfig, Elevation, Error, ExitOutcome,
    HarnessConfig, PollConfig, ProbeResult, ProcessState, Result,
};
