//! The `version` command.

use clap::Args;
use soloist::HarnessConfig;
use std::fmt::Write;

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Also show library versions and built-in defaults
    #[arg(long, short)]
    pub verbose: bool,
}

pub fn run(args: VersionArgs) {
    print!("{}", render(&args));
}

fn render(args: &VersionArgs) -> String {
    let mut out = format!("soloist {}\n", env!("CARGO_PKG_VERSION"));
    if !args.verbose {
        return out;
    }

    // Defaults apply to any field a config file leaves out.
    let defaults = HarnessConfig::new("", "");
    let rows = [
        ("library", soloist::VERSION.to_string()),
        ("core", soloist::CORE_VERSION.to_string()),
        ("target url", defaults.target_url.clone()),
        ("lock file", defaults.lock_path().display().to_string()),
        ("required tools", defaults.all_required_tools().join(", ")),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "  {label:<16}{value}");
    }
    out
}
