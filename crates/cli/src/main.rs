mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{
    check_env::CheckEnvArgs, provision::ProvisionArgs, run::RunArgs, version::VersionArgs,
};
use config::ConfigArgs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "soloist")]
#[command(about = "Supervise a privileged singleton daemon and check it stays singleton")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. "debug", "soloist=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against the daemon while holding the machine lock
    Run(RunArgs),
    /// Check that every tool a run needs is on PATH
    CheckEnv(CheckEnvArgs),
    /// Apply the cluster manifests while holding the machine lock
    Provision(ProvisionArgs),
    /// Show version information
    Version(VersionArgs),
}

impl Commands {
    fn config_args(&self) -> Option<&ConfigArgs> {
        match self {
            Commands::Run(args) => Some(&args.config),
            Commands::CheckEnv(args) => Some(&args.config),
            Commands::Provision(args) => Some(&args.config),
            Commands::Version(_) => None,
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Exit only here, after every command has dropped its lock token.
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let loaded = cli.command.config_args().map(ConfigArgs::load).transpose();
    let file_level = loaded
        .as_ref()
        .ok()
        .and_then(|file| file.as_ref())
        .and_then(|file| file.log.level.clone());
    init_tracing(cli.log_level.as_deref().or(file_level.as_deref()));
    let loaded = loaded?;

    match (cli.command, loaded) {
        (Commands::Run(args), Some(file)) => commands::run::run(args, file.harness).await,
        (Commands::CheckEnv(args), Some(file)) => Ok(commands::check_env::run(args, &file.harness)),
        (Commands::Provision(args), Some(file)) => {
            commands::provision::run(args, file.harness).await?;
            Ok(0)
        }
        (Commands::Version(args), _) => {
            commands::version::run(args);
            Ok(0)
        }
        (_, None) => anyhow::bail!("configuration was not loaded"),
    }
}
