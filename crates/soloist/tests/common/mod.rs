//! Shared fixtures: a fake daemon endpoint and a fake singleton daemon.
//!
//! The fake daemon is a shell script that claims a lock directory with
//! `mkdir`, which is atomic, and removes it on SIGINT. The fake endpoint
//! answers based on whether that directory exists, so it only reports ready
//! while a daemon actually owns the "host state".

#![allow(dead_code)]

use soloist::{DaemonCommand, Elevation, HealthPoller, PrivilegedProcessHandle};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A local HTTP endpoint whose answer is decided per request.
///
/// The responder returns `Some(status)` to answer with that status and
/// `None` to drop the connection without a response.
pub struct FakeTarget {
    url: String,
    task: tokio::task::JoinHandle<()>,
}

impl FakeTarget {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn() -> Option<u16> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake target");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let responder = Arc::new(responder);

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let mut request = Vec::new();
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    if let Some(status) = responder() {
                        let response = format!(
                            "HTTP/1.1 {status} Fake\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                });
            }
        });

        Self {
            url: format!("http://{addr}/"),
            task,
        }
    }

    /// Answers 200 while `dir` exists and 503 otherwise.
    pub async fn guarding(dir: PathBuf) -> Self {
        Self::start(move || Some(if dir.exists() { 200 } else { 503 })).await
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for FakeTarget {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// How a fake daemon reacts when another instance already owns the state.
#[derive(Debug, Clone, Copy)]
pub enum OnConflict {
    /// Refuse to start and leave the running instance alone.
    Refuse,
    /// Tear down the running instance's state, then exit non-zero.
    Clobber,
    /// Keep running next to the existing instance without touching its state.
    Ignore,
}

/// A temp directory holding a fake daemon script and its lock directory.
pub struct FakeDaemon {
    dir: TempDir,
    script: PathBuf,
}

impl FakeDaemon {
    pub fn new(on_conflict: OnConflict) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let state = dir.path().join("state");
        let conflict = match on_conflict {
            OnConflict::Refuse => "echo 'already running' >&2; exit 1",
            OnConflict::Clobber => "rmdir \"$STATE\"; exit 1",
            OnConflict::Ignore => "trap 'exit 0' INT TERM",
        };
        let script = format!(
            r#"#!/bin/sh
STATE='{state}'
trap 'rmdir "$STATE" 2>/dev/null; exit 0' INT TERM
if ! mkdir "$STATE" 2>/dev/null; then
    {conflict}
fi
while true; do sleep 0.05; done
"#,
            state = state.display(),
        );

        let path = dir.path().join("fake-daemon");
        std::fs::write(&path, script).expect("Failed to write fake daemon");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to mark fake daemon executable");

        Self { dir, script: path }
    }

    /// The directory that exists while an instance is serving.
    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// A handle running the script through `/bin/sh` without elevation.
    pub fn handle(&self) -> PrivilegedProcessHandle {
        PrivilegedProcessHandle::new(
            DaemonCommand::new("/bin/sh").arg(&self.script),
            Elevation::None,
        )
    }
}

/// A poller tuned for local fixtures.
pub fn fast_poller() -> HealthPoller {
    HealthPoller::default()
        .interval(Duration::from_millis(50))
        .budget(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(1))
}

/// A handle running `script` with `/bin/sh -c`.
pub fn shell(script: &str) -> PrivilegedProcessHandle {
    PrivilegedProcessHandle::new(
        DaemonCommand::new("/bin/sh").arg("-c").arg(script),
        Elevation::None,
    )
}
