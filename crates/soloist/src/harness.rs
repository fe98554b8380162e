//! One full run: lock, environment check, provisioning, scenarios.

use crate::cluster::{ClusterProvisioner, ClusterResource, KubectlProvisioner};
use crate::environment::Environment;
use crate::lock::{LockToken, MachineLock, ResourceLock, acquire_async};
use crate::scenario::{Scenario, ScenarioReport, SingletonInvariantScenario, SmokeScenario};
use soloist_core::{Error, HarnessConfig, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The scenarios a harness knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    Smoke,
    AlreadyRunning,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::Smoke, ScenarioKind::AlreadyRunning];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Smoke => "smoke",
            ScenarioKind::AlreadyRunning => "already-running",
        }
    }

    fn build(&self, config: &HarnessConfig) -> Box<dyn Scenario> {
        match self {
            ScenarioKind::Smoke => Box::new(SmokeScenario::from_config(config)),
            ScenarioKind::AlreadyRunning => {
                Box::new(SingletonInvariantScenario::from_config(config))
            }
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ScenarioKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown scenario '{s}'")))
    }
}

/// Result of one scenario within a run.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub kind: ScenarioKind,
    pub result: Result<ScenarioReport>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Tools that were missing when the run was skipped.
    pub skipped: Option<Vec<String>>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl RunSummary {
    fn skipped(missing: Vec<String>) -> Self {
        Self {
            skipped: Some(missing),
            outcomes: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// A skipped run counts as passed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(ScenarioOutcome::passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }
}

/// Drives scenarios against the shared cluster.
///
/// The lock and the provisioner are injectable so runs can be exercised
/// without a real cluster or a machine-wide lock file.
pub struct Harness {
    config: HarnessConfig,
    lock: Arc<dyn ResourceLock>,
    provisioner: Arc<dyn ClusterProvisioner>,
    cluster: ClusterResource,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let lock = Arc::new(MachineLock::new(config.lock_path()));
        let cluster = ClusterResource::new(config.cluster.clone());
        Ok(Self {
            config,
            lock,
            provisioner: Arc::new(KubectlProvisioner::new()),
            cluster,
        })
    }

    pub fn with_lock(mut self, lock: Arc<dyn ResourceLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn ClusterProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cluster(&self) -> &ClusterResource {
        &self.cluster
    }

    pub fn environment(&self) -> Environment {
        Environment::detect(self.config.all_required_tools())
    }

    async fn lock(&self) -> Result<LockToken> {
        acquire_async(Arc::clone(&self.lock)).await
    }

    /// Takes the lock and applies the cluster manifests if needed.
    pub async fn provision(&self) -> Result<bool> {
        let _token = self.lock().await?;
        self.cluster.ensure_provisioned(self.provisioner.as_ref()).await
    }

    /// Runs `kinds` in order while holding the lock.
    ///
    /// When a required tool is missing nothing is provisioned or started and
    /// a skipped summary is returned. A provisioning failure aborts the run.
    /// The lock is released before this returns, so callers can exit with
    /// [`RunSummary::exit_code`] afterwards.
    pub async fn run(&self, kinds: &[ScenarioKind]) -> Result<RunSummary> {
        let _token = self.lock().await?;

        let environment = self.environment();
        if let Err(e) = environment.require() {
            warn!(error = %e, "Skipping scenarios");
            return Ok(RunSummary::skipped(environment.missing()));
        }

        self.cluster
            .ensure_provisioned(self.provisioner.as_ref())
            .await?;

        let mut summary = RunSummary::default();
        for kind in kinds {
            let scenario = kind.build(&self.config);
            let started = Instant::now();
            info!(scenario = %kind, "Running scenario");

            let result = scenario.execute().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(report) => {
                    info!(scenario = %kind, ready = report.ready, elapsed_ms, "Scenario passed")
                }
                Err(e) => error!(scenario = %kind, error = %e, elapsed_ms, "Scenario failed"),
            }
            summary.outcomes.push(ScenarioOutcome { kind: *kind, result });
        }
        Ok(summary)
    }
}
