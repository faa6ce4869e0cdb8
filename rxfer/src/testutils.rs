//! Loopback "remote" for tests: the remote side is the local filesystem
//!
//! Commands run through the local `sh`, copies are plain file copies. Connects and copies can be
//! made to fail a given number of times, and every call is counted.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use remote::{CommandOutput, Connector, RemoteSession, SessionConfig};

#[derive(Debug, Default)]
pub struct Faults {
    connects: AtomicUsize,
    copies: AtomicUsize,
    closes: AtomicUsize,
    /// the first `fail_connects` connects fail; `usize::MAX` fails them all
    pub fail_connects: usize,
    pub fail_copies: usize,
}

impl Faults {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn copy_should_fail(&self) -> bool {
        self.copies.fetch_add(1, Ordering::SeqCst) < self.fail_copies
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoopbackConnector {
    pub faults: Arc<Faults>,
}

impl LoopbackConnector {
    pub fn failing_connects(count: usize) -> Self {
        Self {
            faults: Arc::new(Faults {
                fail_connects: count,
                ..Default::default()
            }),
        }
    }

    pub fn failing_copies(count: usize) -> Self {
        Self {
            faults: Arc::new(Faults {
                fail_copies: count,
                ..Default::default()
            }),
        }
    }
}

impl Connector for LoopbackConnector {
    type Session = LoopbackSession;

    async fn connect(&self, config: &SessionConfig) -> anyhow::Result<LoopbackSession> {
        if self.faults.connects.fetch_add(1, Ordering::SeqCst) < self.faults.fail_connects {
            return Err(anyhow!("connection to {config} refused"));
        }
        Ok(LoopbackSession {
            faults: self.faults.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct LoopbackSession {
    faults: Arc<Faults>,
}

impl RemoteSession for LoopbackSession {
    async fn run_command(&self, cmd: &str) -> anyhow::Result<CommandOutput> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn copy_to_remote(
        &self,
        local: &Path,
        remote: &Path,
        _io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        if self.faults.copy_should_fail() {
            return Err(anyhow!("connection reset while copying {local:?}"));
        }
        Ok(tokio::fs::copy(local, remote).await?)
    }

    async fn copy_from_remote(
        &self,
        remote: &Path,
        local: &Path,
        _io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        if self.faults.copy_should_fail() {
            return Err(anyhow!("connection reset while copying {remote:?}"));
        }
        Ok(tokio::fs::copy(remote, local).await?)
    }

    async fn close(self) -> anyhow::Result<()> {
        self.faults.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scratch tree used across tests
///
/// ```text
/// src
/// |- a.txt
/// |- b.log
/// |- c.txt
/// |- sub
///    |- dir
///       |- f.txt
///       |- g.log
/// ```
///
/// Every file holds its own name followed by a newline.
pub async fn sample_tree() -> anyhow::Result<tempfile::TempDir> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("src");
    tokio::fs::create_dir_all(src.join("sub/dir")).await?;
    for name in ["a.txt", "b.log", "c.txt", "sub/dir/f.txt", "sub/dir/g.log"] {
        let path = src.join(name);
        let base = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        tokio::fs::write(&path, format!("{base}\n")).await?;
    }
    Ok(tmp)
}
