use std::fmt;

/// Result of a single readiness probe against an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint answered with HTTP 200.
    Ready,
    /// The endpoint answered, but not with 200.
    NotReady { status: u16 },
    /// The request never produced a response (refused, reset, timed out).
    Unreachable { reason: String },
}

impl ProbeResult {
    pub fn from_status(status: u16) -> Self {
        if status == 200 {
            ProbeResult::Ready
        } else {
            ProbeResult::NotReady { status }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeResult::Ready)
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Ready => write!(f, "ready"),
            ProbeResult::NotReady { status } => write!(f, "status {status}"),
            ProbeResult::Unreachable { reason } => write!(f, "unreachable: {reason}"),
        }
    }
}
