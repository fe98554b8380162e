use crate::types::ExitOutcome;

/// Errors that can occur while supervising a daemon under test.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("environment unavailable: missing {}", .missing.join(", "))]
    EnvironmentUnavailable { missing: Vec<String> },

    #[error("failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("process '{program}' exited abnormally: {outcome}")]
    AbnormalExit {
        program: String,
        outcome: ExitOutcome,
    },

    #[error("failed to signal '{program}': {reason}")]
    SignalFailed { program: String, reason: String },

    #[error("process has already been started")]
    AlreadyStarted,

    #[error("process is not running")]
    NotRunning,

    #[error("'{program}' did not exit within {grace_ms}ms of the interrupt")]
    ShutdownTimeout { program: String, grace_ms: u64 },

    #[error("lost track of '{program}' before its exit was observed")]
    ExitUnobserved { program: String },

    #[error("{url} did not become ready within {budget_ms}ms")]
    ReadinessTimeout { url: String, budget_ms: u64 },

    #[error("gave up polling {url} because the run has already failed")]
    AbandonedAfterFailure { url: String },

    #[error("duplicate killed the primary: {0}")]
    DuplicateKilledPrimary(String),

    #[error("duplicate degraded the primary: status {status}")]
    DuplicateDegradedPrimary { status: u16 },

    #[error("duplicate '{program}' was still running after {after_ms}ms")]
    DuplicateStillRunning { program: String, after_ms: u64 },

    #[error("failed to acquire lock {path}: {reason}")]
    LockFailed { path: String, reason: String },

    #[error("cluster provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scenario '{name}' failed with {} error(s)", .errors.len())]
    ScenarioFailed { name: String, errors: Vec<Error> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the scenario should be skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::EnvironmentUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
