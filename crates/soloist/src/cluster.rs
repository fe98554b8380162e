//! The shared cluster and its one-time provisioning.

use async_trait::async_trait;
use soloist_core::{ClusterConfig, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::info;

/// Applies manifests to a cluster.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, kubeconfig: &Path, manifests: &Path) -> Result<()>;
}

/// Provisioner that shells out to `kubectl apply -f`.
#[derive(Debug, Clone)]
pub struct KubectlProvisioner {
    binary: PathBuf,
}

impl KubectlProvisioner {
    pub fn new() -> Self {
        Self::with_binary("kubectl")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for KubectlProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterProvisioner for KubectlProvisioner {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn apply(&self, kubeconfig: &Path, manifests: &Path) -> Result<()> {
        info!(
            kubeconfig = %kubeconfig.display(),
            manifests = %manifests.display(),
            "Applying manifests"
        );

        let output = Command::new(&self.binary)
            .arg("--kubeconfig")
            .arg(kubeconfig)
            .arg("apply")
            .arg("-f")
            .arg(manifests)
            .output()
            .await
            .map_err(|e| {
                Error::ProvisionFailed(format!("{}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ProvisionFailed(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// The cluster shared by every scenario in a run.
///
/// Manifests are applied at most once per resource, no matter how many
/// callers ask, and only after a successful apply is it marked provisioned.
#[derive(Debug)]
pub struct ClusterResource {
    config: ClusterConfig,
    provisioned: OnceCell<()>,
}

impl ClusterResource {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            provisioned: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.config.kubeconfig
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned.initialized()
    }

    /// Applies the configured manifests if that has not happened yet.
    ///
    /// Returns `true` if this call did the apply. With no manifests
    /// configured there is nothing to do and `false` is returned.
    pub async fn ensure_provisioned(&self, provisioner: &dyn ClusterProvisioner) -> Result<bool> {
        let Some(manifests) = self.config.manifests.as_deref() else {
            return Ok(false);
        };

        let kubeconfig = self.config.kubeconfig.as_path();
        let applied = AtomicBool::new(false);
        let applied_flag = &applied;
        self.provisioned
            .get_or_try_init(move || async move {
                provisioner.apply(kubeconfig, manifests).await?;
                applied_flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await?;

        let applied = applied.into_inner();
        if applied {
            info!(provisioner = provisioner.name(), "Cluster provisioned");
        }
        Ok(applied)
    }
}
