use soloist_core::{Error, Result};
use std::sync::{Arc, Mutex};

/// Shared record of everything that has gone wrong in one scenario.
///
/// Cloning is cheap and every clone sees the same log, so the background
/// wait task, the interrupt scope and the health poller can all report into
/// it. Recording never stops anything by itself; readers decide what to do
/// with [`has_failed`](Self::has_failed).
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    errors: Arc<Mutex<Vec<Error>>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: Error) {
        tracing::error!(error = %error, "recorded failure");
        self.errors.lock().unwrap().push(error);
    }

    pub fn has_failed(&self) -> bool {
        !self.errors.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered messages of the recorded errors, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    /// Returns true if any recorded error satisfies `predicate`.
    pub fn any(&self, predicate: impl Fn(&Error) -> bool) -> bool {
        self.errors.lock().unwrap().iter().any(predicate)
    }

    /// Drains the log, turning recorded errors into a scenario failure.
    pub fn finish(&self, scenario: &str) -> Result<()> {
        let errors = std::mem::take(&mut *self.errors.lock().unwrap());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ScenarioFailed {
                name: scenario.to_string(),
                errors,
            })
        }
    }
}
