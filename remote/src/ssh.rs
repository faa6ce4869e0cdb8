//! OpenSSH-backed remote sessions
//!
//! Sessions are established through the system `ssh` binary (via the `openssh` crate), so
//! `~/.ssh/config`, agents and known keys all apply. Every command runs as `sh -c <script>` on the
//! remote side; file contents are streamed over the command's stdin/stdout.

use std::path::Path;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::session::{CommandOutput, Connector, Credential, RemoteSession, SessionConfig};

pub(crate) const CHUNK_SIZE: usize = 128 * 1024;

/// Connector that opens real SSH sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSshConnector;

#[derive(Debug)]
pub struct SshSession {
    session: openssh::Session,
    destination: String,
}

impl Connector for OpenSshConnector {
    type Session = SshSession;

    #[instrument(skip(self))]
    async fn connect(&self, config: &SessionConfig) -> anyhow::Result<SshSession> {
        let mut builder = openssh::SessionBuilder::default();
        builder
            .known_hosts_check(openssh::KnownHosts::Accept)
            .connect_timeout(config.timeout)
            .port(config.port);
        if let Some(user) = &config.user {
            builder.user(user.clone());
        }
        match &config.credential {
            Credential::Default => {}
            Credential::IdentityFile(path) => {
                builder.keyfile(path);
            }
            Credential::Password(_) => {
                // the master runs with BatchMode=yes, so it can never answer a password prompt
                return Err(anyhow!(
                    "password authentication to {config} needs the embedded SSH client"
                ));
            }
        }
        tracing::debug!("Connecting to SSH destination: {}", config);
        let session = tokio::time::timeout(config.timeout, builder.connect(&config.host))
            .await
            .map_err(|_| {
                anyhow!(
                    "timed out after {:?} connecting to {}",
                    config.timeout,
                    config
                )
            })?
            .with_context(|| format!("failed to establish SSH connection to {config}"))?;
        Ok(SshSession {
            session,
            destination: config.to_string(),
        })
    }
}

/// Build the remote script that receives a file on stdin
///
/// Data lands in a temporary sibling first and is only renamed into place when the received size
/// matches, so an interrupted upload never leaves a file that looks complete.
pub(crate) fn receive_script(remote: &Path, expected_size: u64) -> anyhow::Result<String> {
    let dir = remote
        .parent()
        .with_context(|| format!("remote path {:?} has no parent directory", remote))?;
    let name = remote
        .file_name()
        .with_context(|| format!("remote path {:?} has no file name", remote))?
        .to_str()
        .context("remote file name must be valid UTF-8")?;
    let temp_prefix = crate::escape_path(&dir.join(format!(".{name}.rxfer")))?;
    let final_path = crate::escape_path(remote)?;
    Ok(format!(
        "tmp={temp_prefix}.$$; \
         if cat > \"$tmp\" && [ \"$(wc -c < \"$tmp\" | tr -d ' ')\" = \"{expected_size}\" ]; then \
         mv -f \"$tmp\" {final_path}; \
         else rm -f \"$tmp\"; exit 1; fi"
    ))
}

pub(crate) fn partial_path(local: &Path) -> anyhow::Result<std::path::PathBuf> {
    let name = local
        .file_name()
        .with_context(|| format!("local path {:?} has no file name", local))?;
    let mut partial = std::ffi::OsString::from(".");
    partial.push(name);
    partial.push(".rxfer-part");
    Ok(local.with_file_name(partial))
}

async fn read_stderr(
    stderr: Option<openssh::ChildStderr>,
    io_timeout: std::time::Duration,
) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = Vec::new();
    if tokio::time::timeout(io_timeout, stderr.read_to_end(&mut buf))
        .await
        .is_err()
    {
        tracing::debug!("timed out reading remote stderr");
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

impl SshSession {
    async fn send_file(
        &self,
        local: &Path,
        remote: &Path,
        io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        let mut file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("failed opening {:?} for reading", local))?;
        let expected_size = file
            .metadata()
            .await
            .with_context(|| format!("failed reading metadata from {:?}", local))?
            .len();
        let script = receive_script(remote, expected_size)?;
        let mut child = self
            .session
            .command("sh")
            .arg("-c")
            .arg(&script)
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::null())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .context("failed to spawn remote receive command")?;
        let mut stdin = child
            .stdin()
            .take()
            .context("failed to get stdin for remote command")?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .with_context(|| format!("failed reading {:?}", local))?;
            if n == 0 {
                break;
            }
            tokio::time::timeout(io_timeout, stdin.write_all(&buf[..n]))
                .await
                .map_err(|_| anyhow!("timed out after {:?} sending data", io_timeout))?
                .context("failed to write data to remote stdin")?;
            sent += n as u64;
        }
        // closing stdin delivers EOF so the remote `cat` can finish
        tokio::time::timeout(io_timeout, stdin.shutdown())
            .await
            .map_err(|_| anyhow!("timed out after {:?} closing remote stdin", io_timeout))?
            .context("failed to shutdown stdin")?;
        drop(stdin);
        let stderr = read_stderr(child.stderr().take(), io_timeout).await;
        let status = tokio::time::timeout(io_timeout, child.wait())
            .await
            .map_err(|_| anyhow!("timed out after {:?} waiting for remote copy", io_timeout))?
            .context("failed to wait for remote receive command")?;
        if !status.success() {
            return Err(anyhow!(
                "remote receive of {:?} failed, status code: {:?}, stderr: {}",
                remote,
                status.code(),
                stderr
            ));
        }
        if sent != expected_size {
            return Err(anyhow!(
                "{:?} changed size during transfer: expected {} bytes, sent {}",
                local,
                expected_size,
                sent
            ));
        }
        Ok(sent)
    }

    async fn receive_file(
        &self,
        remote: &Path,
        partial: &Path,
        io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        let script = format!("cat {}", crate::escape_path(remote)?);
        let mut child = self
            .session
            .command("sh")
            .arg("-c")
            .arg(&script)
            .stdin(openssh::Stdio::null())
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .context("failed to spawn remote send command")?;
        let mut stdout = child
            .stdout()
            .take()
            .context("failed to get stdout for remote command")?;
        let mut file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("failed creating {:?}", partial))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received = 0u64;
        loop {
            let n = tokio::time::timeout(io_timeout, stdout.read(&mut buf))
                .await
                .map_err(|_| anyhow!("timed out after {:?} receiving data", io_timeout))?
                .context("failed to read data from remote stdout")?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .with_context(|| format!("failed writing {:?}", partial))?;
            received += n as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("failed flushing {:?}", partial))?;
        drop(file);
        let stderr = read_stderr(child.stderr().take(), io_timeout).await;
        let status = tokio::time::timeout(io_timeout, child.wait())
            .await
            .map_err(|_| anyhow!("timed out after {:?} waiting for remote copy", io_timeout))?
            .context("failed to wait for remote send command")?;
        if !status.success() {
            return Err(anyhow!(
                "remote read of {:?} failed, status code: {:?}, stderr: {}",
                remote,
                status.code(),
                stderr
            ));
        }
        Ok(received)
    }
}

impl RemoteSession for SshSession {
    #[instrument(skip(self), fields(destination = %self.destination))]
    async fn run_command(&self, cmd: &str) -> anyhow::Result<CommandOutput> {
        let output = self
            .session
            .command("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .with_context(|| format!("failed to run remote command: {cmd}"))?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[instrument(skip(self), fields(destination = %self.destination))]
    async fn copy_to_remote(
        &self,
        local: &Path,
        remote: &Path,
        io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        self.send_file(local, remote, io_timeout).await
    }

    #[instrument(skip(self), fields(destination = %self.destination))]
    async fn copy_from_remote(
        &self,
        remote: &Path,
        local: &Path,
        io_timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        let partial = partial_path(local)?;
        match self.receive_file(remote, &partial, io_timeout).await {
            Ok(received) => {
                tokio::fs::rename(&partial, local)
                    .await
                    .with_context(|| format!("failed renaming {:?} to {:?}", partial, local))?;
                Ok(received)
            }
            Err(error) => {
                if let Err(rm_error) = tokio::fs::remove_file(&partial).await {
                    tracing::debug!("failed removing partial file {:?}: {}", partial, rm_error);
                }
                Err(error)
            }
        }
    }

    async fn close(self) -> anyhow::Result<()> {
        tracing::debug!("closing SSH session to {}", self.destination);
        self.session
            .close()
            .await
            .with_context(|| format!("failed to close SSH session to {}", self.destination))
    }
}
