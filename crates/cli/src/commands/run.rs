//! The `run` command - runs scenarios against the daemon.

use crate::config::ConfigArgs;
use clap::{Args, ValueEnum};
use soloist::{Error, Harness, HarnessConfig, RunSummary, ScenarioKind};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Scenario to run
    #[arg(long, short, value_enum, default_value_t = ScenarioArg::All)]
    scenario: ScenarioArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioArg {
    Smoke,
    AlreadyRunning,
    All,
}

impl ScenarioArg {
    fn kinds(self) -> Vec<ScenarioKind> {
        match self {
            ScenarioArg::Smoke => vec![ScenarioKind::Smoke],
            ScenarioArg::AlreadyRunning => vec![ScenarioKind::AlreadyRunning],
            ScenarioArg::All => ScenarioKind::ALL.to_vec(),
        }
    }
}

pub async fn run(args: RunArgs, config: HarnessConfig) -> anyhow::Result<i32> {
    let harness = Harness::new(config)?;
    let summary = harness.run(&args.scenario.kinds()).await?;
    print_summary(&summary);
    Ok(summary.exit_code())
}

fn print_summary(summary: &RunSummary) {
    if let Some(missing) = &summary.skipped {
        println!("SKIP all scenarios: missing {}", missing.join(", "));
        return;
    }

    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(report) => match &report.duplicate {
                Some(duplicate) => println!("PASS {} (duplicate: {duplicate})", outcome.kind),
                None => println!("PASS {}", outcome.kind),
            },
            Err(Error::ScenarioFailed { errors, .. }) => {
                println!("FAIL {}", outcome.kind);
                for error in errors {
                    println!("  - {error}");
                }
            }
            Err(e) => println!("FAIL {}: {e}", outcome.kind),
        }
    }
}
