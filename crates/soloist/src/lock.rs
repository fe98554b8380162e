//! Mutual exclusion over the shared test cluster.
//!
//! Every run takes one [`ResourceLock`] before touching host network state or
//! the cluster. The lock is an injected object rather than a global so the
//! other components can be exercised with a [`NoopLock`].
//!
//! # Implementations
//!
//! - [`MachineLock`] takes an exclusive `flock` on a well-known file, which
//!   serializes every process on the host. Two acquisitions inside the same
//!   process also exclude each other because each opens its own descriptor.
//! - [`ProcessLock`] excludes callers within one process only.
//! - [`NoopLock`] never blocks.
//!
//! Acquisition blocks until the lock is free; there is no retry or timeout.
//! The returned [`LockToken`] releases on drop, including during unwinding.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use soloist_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A lock guarding exclusive access to the shared cluster.
pub trait ResourceLock: Send + Sync {
    /// Blocks until the lock is held by the caller.
    fn acquire(&self) -> Result<LockToken>;

    /// Human readable name used in logs and errors.
    fn describe(&self) -> String;
}

/// Proof of exclusive ownership. Dropping it releases the lock.
pub struct LockToken {
    held: Held,
    name: String,
    acquired_at: Instant,
}

enum Held {
    File(Flock<File>),
    Process(ProcessRelease),
    Noop,
}

impl LockToken {
    fn new(held: Held, name: String) -> Self {
        Self {
            held,
            name,
            acquired_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        let kind = match self.held {
            Held::File(_) => "machine",
            Held::Process(_) => "process",
            Held::Noop => "noop",
        };
        debug!(
            lock = %self.name,
            kind,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Released lock"
        );
    }
}

/// Machine-wide lock backed by `flock(2)` on a file.
#[derive(Debug, Clone)]
pub struct MachineLock {
    path: PathBuf,
}

impl MachineLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.failed(e.to_string()))
    }

    fn failed(&self, reason: String) -> Error {
        Error::LockFailed {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

impl ResourceLock for MachineLock {
    fn acquire(&self) -> Result<LockToken> {
        let mut file = self.open()?;
        let started = Instant::now();
        info!(path = %self.path.display(), "Waiting for machine lock");

        let locked = loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(locked) => break locked,
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, errno)) => return Err(self.failed(errno.to_string())),
            }
        };

        // The owner's pid is only a diagnostic for whoever is waiting.
        let mut owner: &File = &locked;
        if let Err(e) = owner
            .set_len(0)
            .and_then(|_| writeln!(owner, "{}", std::process::id()))
        {
            warn!(path = %self.path.display(), error = %e, "Failed to record lock owner");
        }

        info!(
            path = %self.path.display(),
            waited_ms = started.elapsed().as_millis() as u64,
            "Acquired machine lock"
        );
        Ok(LockToken::new(Held::File(locked), self.describe()))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct ProcessLockState {
    held: Mutex<bool>,
    released: Condvar,
}

struct ProcessRelease(Arc<ProcessLockState>);

impl Drop for ProcessRelease {
    fn drop(&mut self) {
        *self.0.held.lock().unwrap() = false;
        self.0.released.notify_one();
    }
}

/// Lock that excludes callers within the current process.
#[derive(Debug, Clone, Default)]
pub struct ProcessLock {
    state: Arc<ProcessLockState>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceLock for ProcessLock {
    fn acquire(&self) -> Result<LockToken> {
        let mut held = self.state.held.lock().unwrap();
        while *held {
            held = self.state.released.wait(held).unwrap();
        }
        *held = true;
        drop(held);

        Ok(LockToken::new(
            Held::Process(ProcessRelease(Arc::clone(&self.state))),
            self.describe(),
        ))
    }

    fn describe(&self) -> String {
        "process-lock".to_string()
    }
}

/// Lock that is always free.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

impl ResourceLock for NoopLock {
    fn acquire(&self) -> Result<LockToken> {
        Ok(LockToken::new(Held::Noop, self.describe()))
    }

    fn describe(&self) -> String {
        "noop-lock".to_string()
    }
}

/// Runs `body` while holding `lock`.
///
/// The lock is released as soon as `body` returns or unwinds. A body that
/// wants to end the process should return its exit code and let the caller
/// exit, so the release always happens first.
pub fn with_exclusive_access<L, F, T>(lock: &L, body: F) -> Result<T>
where
    L: ResourceLock + ?Sized,
    F: FnOnce() -> T,
{
    let token = lock.acquire()?;
    let out = body();
    drop(token);
    Ok(out)
}

/// Acquires `lock` on tokio's blocking pool.
pub async fn acquire_async(lock: Arc<dyn ResourceLock>) -> Result<LockToken> {
    let name = lock.describe();
    tokio::task::spawn_blocking(move || lock.acquire())
        .await
        .map_err(|e| Error::LockFailed {
            path: name,
            reason: e.to_string(),
        })?
}
