//! Embedded SSH client for password authentication
//!
//! The OpenSSH multiplexer can't answer password prompts, so password logins go through `russh`
//! instead. Commands and file streaming mirror [`crate::ssh`]: every command is a `sh -c`
//! script on an exec channel, pushes stream into a temporary file that is renamed once the size
//! matches, pulls land in a hidden partial file first.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::session::{CommandOutput, Connector, Credential, RemoteSession, SessionConfig};
use crate::ssh::{CHUNK_SIZE, partial_path, receive_script};

/// Connector that authenticates with a password over an in-process SSH client
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedConnector;

struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // same policy as the OpenSSH path: host keys are accepted
        Ok(true)
    }
}

pub struct EmbeddedSession {
    handle: russh::client::Handle<ClientHandler>,
    destination: String,
}

impl std::fmt::Debug for EmbeddedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedSession")
            .field("destination", &self.destination)
            .finish()
    }
}

fn login_user(config: &SessionConfig) -> anyhow::Result<String> {
    if let Some(user) = &config.user {
        return Ok(user.clone());
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .with_context(|| format!("no user given for {config} and $USER is not set"))
}

impl Connector for EmbeddedConnector {
    type Session = EmbeddedSession;

    #[instrument(skip(self))]
    async fn connect(&self, config: &SessionConfig) -> anyhow::Result<EmbeddedSession> {
        let Credential::Password(password) = &config.credential else {
            return Err(anyhow!(
                "the embedded SSH client only supports password authentication"
            ));
        };
        let user = login_user(config)?;
        let connect = async {
            let ssh_config = Arc::new(russh::client::Config::default());
            let mut handle = russh::client::connect(
                ssh_config,
                (config.host.as_str(), config.port),
                ClientHandler,
            )
            .await
            .with_context(|| format!("failed to establish SSH connection to {config}"))?;
            let auth = handle
                .authenticate_password(user.as_str(), password.as_str())
                .await
                .with_context(|| format!("password authentication to {config} failed"))?;
            if !auth.success() {
                return Err(anyhow!("password rejected by {config}"));
            }
            Ok(handle)
        };
        tracing::debug!("Connecting to SSH destination: {}", config);
        let handle = tokio::time::timeout(config.timeout, connect)
            .await
            .map_err(|_| {
                anyhow!(
                    "timed out after {:?} connecting to {}",
                    config.timeout,
                    config
                )
            })??;
        Ok(EmbeddedSession {
            handle,
            destination: config.to_string(),
        })
    }
}

/// Exit status, stderr and stdout byte count collected once a channel closes
#[derive(Debug, Default)]
struct ChannelEnd {
    code: Option<u32>,
    stderr: Vec<u8>,
    stdout_bytes: u64,
}

impl ChannelEnd {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

impl EmbeddedSession {
    async fn open_exec(
        &self,
        script: &str,
    ) -> anyhow::Result<russh::Channel<russh::client::Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .context("failed to open SSH channel")?;
        channel
            .exec(true, format!("sh -c {}", crate::shell_escape(script)))
            .await
            .context("failed to start remote command")?;
        Ok(channel)
    }

    /// Read a channel until it closes, copying its stdout into `stdout`
    async fn drain_channel<W: tokio::io::AsyncWrite + Unpin + Send>(
        channel: &mut russh::Channel<russh::client::Msg>,
        io_timeout: Option<std::time::Duration>,
        stdout: &mut W,
    ) -> anyhow::Result<ChannelEnd> {
        let mut end = ChannelEnd::default();
        loop {
            let msg = match io_timeout {
                Some(io_timeout) => tokio::time::timeout(io_timeout, channel.wait())
                    .await
                    .map_err(|_| anyhow!("timed out after {:?} waiting for data", io_timeout))?,
                None => channel.wait().await,
            };
            match msg {
                Some(russh::ChannelMsg::Data { data }) => {
                    stdout
                        .write_all(&data[..])
                        .await
                        .context("failed writing remote command output")?;
                    end.stdout_bytes += data.len() as u64;
                }
                Some(russh::ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    end.stderr.extend_from_slice(&data[..]);
                }
                Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                    end.code = Some(exit_status);
                }
                Some(russh::ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        stdout
            .flush()
            .await
            .context("failed flushing remote command output")?;
        Ok(end)
    }

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
        let mut channel = self.open_exec(&script).await?;
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
            tokio::time::timeout(io_timeout, channel.data(&buf[..n]))
                .await
                .map_err(|_| anyhow!("timed out after {:?} sending data", io_timeout))?
                .context("failed to write data to remote command")?;
            sent += n as u64;
        }
        channel
            .eof()
            .await
            .context("failed to close remote stdin")?;
        let end =
            Self::drain_channel(&mut channel, Some(io_timeout), &mut tokio::io::sink()).await?;
        if !end.success() {
            return Err(anyhow!(
                "remote receive of {:?} failed, status code: {:?}, stderr: {}",
                remote,
                end.code,
                end.stderr()
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
        let mut channel = self.open_exec(&script).await?;
        let mut file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("failed creating {:?}", partial))?;
        let end = Self::drain_channel(&mut channel, Some(io_timeout), &mut file)
            .await
            .with_context(|| format!("failed receiving into {:?}", partial))?;
        if !end.success() {
            return Err(anyhow!(
                "remote read of {:?} failed, status code: {:?}, stderr: {}",
                remote,
                end.code,
                end.stderr()
            ));
        }
        Ok(end.stdout_bytes)
    }
}

impl RemoteSession for EmbeddedSession {
    #[instrument(skip(self), fields(destination = %self.destination))]
    async fn run_command(&self, cmd: &str) -> anyhow::Result<CommandOutput> {
        let mut channel = self
            .open_exec(cmd)
            .await
            .with_context(|| format!("failed to run remote command: {cmd}"))?;
        let mut stdout = Vec::new();
        let end = Self::drain_channel(&mut channel, None, &mut stdout).await?;
        Ok(CommandOutput {
            success: end.success(),
            code: end.code.map(|code| code as i32),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&end.stderr).into_owned(),
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
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
            .with_context(|| format!("failed to close SSH session to {}", self.destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_non_password_credentials() {
        let mut config = SessionConfig::new("127.0.0.1");
        config.credential = Credential::IdentityFile("/keys/id".into());
        let error = EmbeddedConnector.connect(&config).await.unwrap_err();
        assert!(format!("{error:#}").contains("only supports password"));
    }

    #[tokio::test]
    async fn connect_fails_when_server_hangs_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // accept and hang up before any SSH banner is exchanged
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        let mut config = SessionConfig::new("127.0.0.1");
        config.port = port;
        config.user = Some("alice".to_string());
        config.credential = Credential::Password("secret".to_string());
        config.timeout = std::time::Duration::from_secs(10);
        let error = EmbeddedConnector.connect(&config).await.unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("127.0.0.1"), "{message}");
        assert!(!message.contains("secret"), "{message}");
        server.await.unwrap();
    }

    #[test]
    fn login_user_prefers_configured_user() {
        let mut config = SessionConfig::new("h");
        config.user = Some("bob".to_string());
        assert_eq!(login_user(&config).unwrap(), "bob");
    }
}
