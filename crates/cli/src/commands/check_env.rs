//! The `check-env` command - reports which required tools are missing.

use crate::config::ConfigArgs;
use clap::Args;
use soloist::{Environment, HarnessConfig};

#[derive(Args)]
pub struct CheckEnvArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn run(_args: CheckEnvArgs, config: &HarnessConfig) -> i32 {
    let environment = Environment::detect(config.all_required_tools());

    for tool in environment.tools() {
        match &tool.path {
            Some(path) => println!("  {:<12} {}", tool.name, path.display()),
            None => println!("  {:<12} missing", tool.name),
        }
    }

    if environment.is_available() {
        println!("Environment ready.");
        0
    } else {
        println!(
            "Scenarios would be skipped: missing {}",
            environment.missing().join(", ")
        );
        1
    }
}
