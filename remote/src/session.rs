//! Remote session capability consumed by the transfer engine
//!
//! A [`Connector`] opens one [`RemoteSession`] per transfer attempt; sessions are never shared
//! between workers or reused across tasks.

use std::future::Future;
use std::path::Path;

use anyhow::{Context, anyhow};

/// How to authenticate against the remote host
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credential {
    /// whatever `ssh` would use on its own: agent, `~/.ssh/config`, default keys
    #[default]
    Default,
    /// an explicit private key file
    IdentityFile(std::path::PathBuf),
    /// password authentication; needs the embedded client, see [`crate::embedded`]
    Password(String),
}

// keeps passwords out of `#[instrument]` spans and debug logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Default => write!(f, "Default"),
            Credential::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            Credential::Password(_) => write!(f, "Password(<redacted>)"),
        }
    }
}

/// Connection parameters shared read-only by every worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub credential: Credential,
    /// connect timeout
    pub timeout: std::time::Duration,
}

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

impl SessionConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            user: None,
            credential: Credential::Default,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl std::fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Captured result of a remote shell command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// An open session to a remote host
///
/// `exists` and `mkdir_p` have default implementations on top of `run_command`.
pub trait RemoteSession: Send + Sync + Sized {
    /// Run `cmd` through `sh -c` on the remote host and capture its output
    fn run_command(&self, cmd: &str) -> impl Future<Output = anyhow::Result<CommandOutput>> + Send;

    /// Copy a local file to `remote`, returning the number of bytes sent
    ///
    /// `io_timeout` bounds every individual read/write, not the whole copy. The file only
    /// appears under its final name once all bytes arrived.
    fn copy_to_remote(
        &self,
        local: &Path,
        remote: &Path,
        io_timeout: std::time::Duration,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Copy a remote file to `local`, returning the number of bytes received
    fn copy_from_remote(
        &self,
        remote: &Path,
        local: &Path,
        io_timeout: std::time::Duration,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn close(self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn exists(&self, path: &Path) -> impl Future<Output = anyhow::Result<bool>> + Send {
        async move {
            let cmd = format!("test -e {}", crate::escape_path(path)?);
            let output = self.run_command(&cmd).await?;
            match output.code {
                Some(0) => Ok(true),
                Some(1) => Ok(false),
                code => Err(anyhow!(
                    "failed to check whether {:?} exists, exit code: {:?}, stderr: {}",
                    path,
                    code,
                    output.stderr.trim()
                )),
            }
        }
    }

    fn mkdir_p(&self, path: &Path) -> impl Future<Output = anyhow::Result<()>> + Send {
        async move {
            let cmd = format!("mkdir -p {}", crate::escape_path(path)?);
            let output = self
                .run_command(&cmd)
                .await
                .with_context(|| format!("failed to create remote directory {:?}", path))?;
            if !output.success {
                return Err(anyhow!(
                    "failed to create remote directory {:?}: {}",
                    path,
                    output.stderr.trim()
                ));
            }
            Ok(())
        }
    }
}

/// Opens sessions described by a [`SessionConfig`]
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteSession + 'static;

    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = anyhow::Result<Self::Session>> + Send;
}
