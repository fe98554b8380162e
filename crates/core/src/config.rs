//! Harness configuration.
//!
//! The configuration is plain serde data so it can be loaded from TOML by the
//! CLI or built in code by tests. Every section has defaults matching the
//! behaviour of a stock run: probe `http://httptarget` once per second for up
//! to thirty seconds, and launch the daemon through `sudo`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hostname the daemon exposes once it is routing traffic.
pub const DEFAULT_TARGET_URL: &str = "http://httptarget";

const DEFAULT_LOCK_FILE: &str = "soloist.lock";

/// How the daemon command is elevated before it is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// Run the command as the current user.
    None,
    /// Run through `sudo`, preserving the environment and never prompting.
    #[default]
    Sudo,
}

impl Elevation {
    /// Command prefix that performs the elevation.
    pub fn prefix(&self) -> &'static [&'static str] {
        match self {
            Elevation::None => &[],
            Elevation::Sudo => &["sudo", "--preserve-env", "--non-interactive"],
        }
    }

    /// External tool the elevation depends on, if any.
    pub fn required_tool(&self) -> Option<&'static str> {
        self.prefix().first().copied()
    }
}

/// The daemon under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the daemon binary.
    pub binary: PathBuf,
    #[serde(default)]
    pub elevation: Elevation,
    /// Arguments appended after `--kubeconfig=<path>`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// The shared cluster every scenario talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Credentials file handed to the daemon and to the provisioner.
    pub kubeconfig: PathBuf,
    /// Directory of manifests applied once before any scenario runs.
    pub manifests: Option<PathBuf>,
}

/// Readiness polling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub budget_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            budget_ms: 30_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub daemon: DaemonConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default = "default_target_url")]
    pub target_url: String,
    /// Machine-wide lock file. Defaults to `soloist.lock` in the temp dir.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    /// How long to wait for the daemon to exit after the interrupt before
    /// escalating to a kill. `None` or `0` waits forever.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: Option<u64>,
    /// Tools that must be on `PATH` for cluster scenarios to run at all.
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

fn default_shutdown_grace_ms() -> Option<u64> {
    Some(60_000)
}

fn default_required_tools() -> Vec<String> {
    vec!["docker".to_string(), "kubectl".to_string()]
}

impl HarnessConfig {
    pub fn new(binary: impl Into<PathBuf>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            daemon: DaemonConfig {
                binary: binary.into(),
                elevation: Elevation::default(),
                extra_args: Vec::new(),
            },
            cluster: ClusterConfig {
                kubeconfig: kubeconfig.into(),
                manifests: None,
            },
            poll: PollConfig::default(),
            target_url: default_target_url(),
            lock_path: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            required_tools: default_required_tools(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LOCK_FILE))
    }

    pub fn shutdown_grace(&self) -> Option<Duration> {
        self.shutdown_grace_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Every tool the run needs: the configured list plus the elevation tool.
    pub fn all_required_tools(&self) -> Vec<String> {
        let mut tools = self.required_tools.clone();
        if let Some(tool) = self.daemon.elevation.required_tool()
            && !tools.iter().any(|t| t == tool)
        {
            tools.insert(0, tool.to_string());
        }
        tools
    }

    pub fn validate(&self) -> Result<()> {
        if self.daemon.binary.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("daemon binary must be set".into()));
        }
        if self.cluster.kubeconfig.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("cluster kubeconfig must be set".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll interval must be at least 1ms".into(),
            ));
        }
        if self.poll.budget_ms == 0 {
            return Err(Error::InvalidConfig("poll budget must be at least 1ms".into()));
        }
        if self.poll.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll request timeout must be at least 1ms".into(),
            ));
        }
        if !(self.target_url.starts_with("http://") || self.target_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "target url must be http(s): {}",
                self.target_url
            )));
        }
        Ok(())
    }
}
