mod health;
mod process;

pub use health::ProbeResult;
pub use process::{ExitOutcome, ProcessState};
