pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClusterConfig, DaemonConfig, DEFAULT_TARGET_URL, Elevation, HarnessConfig, PollConfig,
};
pub use error::{Error, Result};
pub use types::{ExitOutcome, ProbeResult, ProcessState};

/// Version of the shared types crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
