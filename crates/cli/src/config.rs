//! Configuration file loading and command-line overrides.

use clap::Args;
use serde::Deserialize;
use soloist::{Elevation, HarnessConfig};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "soloist.toml";

/// Contents of `soloist.toml`: the harness configuration plus CLI settings.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(flatten)]
    pub harness: HarnessConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// Filter used when neither RUST_LOG nor --log-level is given.
    pub level: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Daemon binary (overrides the config file)
    #[arg(long)]
    pub daemon: Option<PathBuf>,

    /// Cluster credentials passed to the daemon (overrides the config file)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// URL probed for readiness (overrides the config file)
    #[arg(long)]
    pub target_url: Option<String>,

    /// Launch the daemon without sudo
    #[arg(long)]
    pub no_sudo: bool,
}

impl ConfigArgs {
    pub fn load(&self) -> anyhow::Result<ConfigFile> {
        let mut file = read(&self.config)?;
        self.apply(&mut file.harness);
        file.harness.validate()?;
        Ok(file)
    }

    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(daemon) = &self.daemon {
            config.daemon.binary = daemon.clone();
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            config.cluster.kubeconfig = kubeconfig.clone();
        }
        if let Some(url) = &self.target_url {
            config.target_url = url.clone();
        }
        if self.no_sudo {
            config.daemon.elevation = Elevation::None;
        }
    }
}

fn read(path: &Path) -> anyhow::Result<ConfigFile> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse(&text).map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
}

fn parse(text: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(text)
}
