//! Handles for elevated daemon processes.
//!
//! A [`PrivilegedProcessHandle`] represents exactly one daemon instance. It
//! is single-use: once started it can be signalled and waited on, and once
//! its exit has been observed it is finished for good.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted --start()--> Running --interrupt()--> SignalSent
//!                            |                         |
//!                            +------- wait() ----------+--> Exited
//! ```
//!
//! The handle is shared (`Arc`) between the task that owns the blocking
//! [`wait`](PrivilegedProcessHandle::wait) and the foreground code that sends
//! signals, so every method takes `&self`.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use soloist_core::{DaemonConfig, Elevation, Error, ExitOutcome, ProcessState, Result};
use std::ffi::{OsStr, OsString};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use tokio::process::{Child, Command};
use tracing::{info, warn};

const STATE_NOT_STARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SIGNAL_SENT: u8 = 2;
const STATE_EXITED: u8 = 3;

/// Program and arguments of a daemon invocation, before elevation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl DaemonCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The daemon pointed at a cluster: `<binary> --kubeconfig=<path>`.
    pub fn for_daemon(binary: impl Into<PathBuf>, kubeconfig: &Path) -> Self {
        let mut flag = OsString::from("--kubeconfig=");
        flag.push(kubeconfig);
        Self::new(binary).arg(flag)
    }

    pub fn from_config(daemon: &DaemonConfig, kubeconfig: &Path) -> Self {
        Self::for_daemon(&daemon.binary, kubeconfig).args(&daemon.extra_args)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }
}

/// One daemon process, possibly running with elevated privilege.
pub struct PrivilegedProcessHandle {
    command: DaemonCommand,
    elevation: Elevation,
    state: AtomicU8,
    pid: OnceLock<u32>,
    child: Mutex<Option<Child>>,
    exit: Mutex<Option<ExitOutcome>>,
}

impl PrivilegedProcessHandle {
    pub fn new(command: DaemonCommand, elevation: Elevation) -> Self {
        Self {
            command,
            elevation,
            state: AtomicU8::new(STATE_NOT_STARTED),
            pid: OnceLock::new(),
            child: Mutex::new(None),
            exit: Mutex::new(None),
        }
    }

    /// Builds a handle for the configured daemon against `kubeconfig`.
    pub fn for_daemon(daemon: &DaemonConfig, kubeconfig: &Path) -> Self {
        Self::new(
            DaemonCommand::from_config(daemon, kubeconfig),
            daemon.elevation,
        )
    }

    /// Full argument vector that will be executed, elevation prefix included.
    pub fn invocation(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self
            .elevation
            .prefix()
            .iter()
            .map(OsString::from)
            .collect();
        argv.push(self.command.program.clone().into_os_string());
        argv.extend(self.command.args.iter().cloned());
        argv
    }

    /// Short name used in logs and errors.
    pub fn program_name(&self) -> String {
        self.command
            .program
            .file_name()
            .unwrap_or(self.command.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub fn status(&self) -> ProcessState {
        match self.state.load(Ordering::SeqCst) {
            STATE_NOT_STARTED => ProcessState::NotStarted,
            STATE_RUNNING => ProcessState::Running,
            STATE_SIGNAL_SENT => ProcessState::SignalSent,
            _ => match *self.exit.lock().unwrap() {
                Some(outcome) => ProcessState::Exited(outcome),
                None => ProcessState::Exited(ExitOutcome {
                    code: None,
                    signal: None,
                }),
            },
        }
    }

    /// Spawns the process.
    ///
    /// Fails with [`Error::AlreadyStarted`] if the handle was started before,
    /// and with [`Error::SpawnFailed`] if the process could not be created.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().unwrap();
        if self.state.load(Ordering::SeqCst) != STATE_NOT_STARTED {
            return Err(Error::AlreadyStarted);
        }

        let argv = self.invocation();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::InvalidConfig("empty daemon invocation".into()))?;

        // The child moves into whichever task waits on it, so dropping that
        // task must not leave the daemon behind.
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            program: self.program_name(),
            reason: e.to_string(),
        })?;

        if let Some(pid) = child.id() {
            let _ = self.pid.set(pid);
        }
        *slot = Some(child);
        self.state.store(STATE_RUNNING, Ordering::SeqCst);

        info!(
            program = %self.program_name(),
            pid = ?self.pid(),
            elevation = ?self.elevation,
            "Started daemon"
        );
        Ok(())
    }

    /// Waits for the process to exit.
    ///
    /// Fails with [`Error::AbnormalExit`] on a non-zero exit, and with
    /// [`Error::NotRunning`] if there is nothing left to wait for.
    pub async fn wait(&self) -> Result<ExitOutcome> {
        let child = self.child.lock().unwrap().take();
        let Some(mut child) = child else {
            return Err(Error::NotRunning);
        };

        let status = child.wait().await?;
        let outcome = exit_outcome(status);
        *self.exit.lock().unwrap() = Some(outcome);
        self.state.store(STATE_EXITED, Ordering::SeqCst);

        info!(program = %self.program_name(), %outcome, "Daemon exited");

        if outcome.success() {
            Ok(outcome)
        } else {
            Err(Error::AbnormalExit {
                program: self.program_name(),
                outcome,
            })
        }
    }

    /// Starts the process and waits for it to exit.
    pub async fn run(&self) -> Result<ExitOutcome> {
        self.start()?;
        self.wait().await
    }

    /// Asks the process to shut down gracefully with `SIGINT`.
    pub fn interrupt(&self) -> Result<()> {
        self.send(Signal::SIGINT)?;
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_SIGNAL_SENT,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        Ok(())
    }

    /// Forcefully terminates the process with `SIGKILL`.
    ///
    /// When the handle is elevated this kills the elevation wrapper; the
    /// daemon itself only sees the interrupt that preceded it.
    pub fn kill(&self) -> Result<()> {
        self.send(Signal::SIGKILL)
    }

    fn send(&self, sig: Signal) -> Result<()> {
        let failed = |reason: String| Error::SignalFailed {
            program: self.program_name(),
            reason,
        };

        match self.state.load(Ordering::SeqCst) {
            STATE_NOT_STARTED => return Err(Error::NotRunning),
            STATE_EXITED => return Err(failed("process has already exited".to_string())),
            _ => {}
        }

        let pid = self.pid().ok_or(Error::NotRunning)?;
        let pid = i32::try_from(pid).map_err(|e| failed(e.to_string()))?;
        signal::kill(Pid::from_raw(pid), sig).map_err(|e| failed(e.to_string()))?;

        info!(program = %self.program_name(), pid, signal = %sig, "Signalled daemon");
        Ok(())
    }
}

impl Drop for PrivilegedProcessHandle {
    fn drop(&mut self) {
        let child = self
            .child
            .get_mut()
            .map(|slot| slot.take())
            .unwrap_or_default();
        if let Some(mut child) = child {
            warn!(
                program = %self.program_name(),
                pid = ?self.pid(),
                "Daemon handle dropped while still running, killing it"
            );
            let _ = child.start_kill();
        }
    }
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    ExitOutcome {
        code: status.code(),
        signal: status.signal(),
    }
}
