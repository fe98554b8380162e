//! Host prerequisite detection.
//!
//! Cluster scenarios need external tools (a container runtime, the cluster
//! client, the elevation wrapper). When any is missing the run is skipped
//! rather than failed.

use soloist_core::{Error, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Lookup result for one required tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Snapshot of which required tools are on `PATH`.
#[derive(Debug, Clone)]
pub struct Environment {
    tools: Vec<ToolStatus>,
}

impl Environment {
    pub fn detect<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tools = tools
            .into_iter()
            .map(|name| {
                let name = name.as_ref().to_string();
                let path = which::which(&name).ok();
                match &path {
                    Some(p) => debug!(tool = %name, path = %p.display(), "Found tool"),
                    None => warn!(tool = %name, "Tool not found on PATH"),
                }
                ToolStatus { name, path }
            })
            .collect();
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolStatus] {
        &self.tools
    }

    pub fn is_available(&self) -> bool {
        self.tools.iter().all(ToolStatus::is_available)
    }

    pub fn missing(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|t| !t.is_available())
            .map(|t| t.name.clone())
            .collect()
    }

    /// Fails with [`Error::EnvironmentUnavailable`] naming every missing tool.
    pub fn require(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::EnvironmentUnavailable { missing })
        }
    }
}
