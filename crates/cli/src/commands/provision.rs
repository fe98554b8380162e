//! The `provision` command - applies cluster manifests under the lock.

use crate::config::ConfigArgs;
use clap::Args;
use soloist::{Harness, HarnessConfig};

#[derive(Args)]
pub struct ProvisionArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub async fn run(_args: ProvisionArgs, config: HarnessConfig) -> anyhow::Result<()> {
    if config.cluster.manifests.is_none() {
        println!("No manifests configured, nothing to apply.");
        return Ok(());
    }

    let harness = Harness::new(config)?;
    harness.provision().await?;
    println!("Cluster provisioned.");
    Ok(())
}
