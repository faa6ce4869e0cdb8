//! Command line surface shared by `rpush` and `rpull`

use std::path::PathBuf;

use anyhow::anyhow;
use common::Summary;
use common::filter::NamePattern;
use remote::{Connector, Credential, EmbeddedConnector, OpenSshConnector, SessionConfig};
use tracing::instrument;

use crate::path::{Endpoint, RemotePath, parse_path};
use crate::pool::{Coordinator, PoolSettings};
use crate::task::Direction;
use crate::worker::{RetryPolicy, TransferSettings};

#[derive(clap::Args, Debug, Clone)]
pub struct TransferArgs {
    // Transfer options
    /// Only transfer files whose name matches this glob (`*`, `?`, `[...]`)
    #[arg(
        short = 'p',
        long,
        default_value = "*",
        value_name = "GLOB",
        help_heading = "Transfer options"
    )]
    pub pattern: NamePattern,

    /// Number of concurrent transfer workers
    #[arg(
        short = 'j',
        long,
        default_value = "4",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    pub workers: usize,

    /// Attempts per file before giving up
    #[arg(long, default_value = "3", value_name = "N", help_heading = "Transfer options")]
    pub retries: usize,

    /// Pause between attempts, e.g. "5s", "500ms"
    #[arg(
        long,
        default_value = "5s",
        value_name = "DELAY",
        value_parser = humantime::parse_duration,
        help_heading = "Transfer options"
    )]
    pub retry_delay: std::time::Duration,

    /// How often idle workers check for new work or shutdown
    #[arg(
        long,
        default_value = "5s",
        value_name = "INTERVAL",
        value_parser = humantime::parse_duration,
        help_heading = "Transfer options"
    )]
    pub poll_interval: std::time::Duration,

    // SSH options
    /// Private key used for authentication (default: ssh agent and ~/.ssh/config)
    #[arg(short = 'i', long, value_name = "PATH", help_heading = "SSH options")]
    pub identity: Option<PathBuf>,

    /// Log in with a password instead of keys; prefer the environment variable over the flag
    #[arg(
        long,
        env = "RXFER_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD",
        conflicts_with = "identity",
        help_heading = "SSH options"
    )]
    pub password: Option<String>,

    /// SSH port, overrides the one given in the remote path
    #[arg(short = 'P', long, value_name = "PORT", help_heading = "SSH options")]
    pub port: Option<u16>,

    /// Timeout for establishing a connection
    #[arg(
        long,
        default_value = "60s",
        value_name = "TIMEOUT",
        value_parser = humantime::parse_duration,
        help_heading = "SSH options"
    )]
    pub connect_timeout: std::time::Duration,

    /// Give up on a copy when no data moved for this long
    #[arg(
        long,
        default_value = "60s",
        value_name = "TIMEOUT",
        value_parser = humantime::parse_duration,
        help_heading = "SSH options"
    )]
    pub io_timeout: std::time::Duration,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    pub progress: bool,

    /// Set delay between progress updates, e.g. "200ms", "1s"
    #[arg(
        long,
        value_name = "DELAY",
        value_parser = humantime::parse_duration,
        help_heading = "Progress & output"
    )]
    pub progress_delay: Option<std::time::Duration>,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    pub summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    pub verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    pub quiet: bool,

    // Performance
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance"
    )]
    pub max_workers: usize,
}

impl TransferArgs {
    pub fn output(&self) -> common::OutputConfig {
        common::OutputConfig {
            quiet: self.quiet,
            verbose: self.verbose,
            print_summary: self.summary,
        }
    }

    pub fn runtime(&self) -> common::RuntimeConfig {
        common::RuntimeConfig {
            max_workers: self.max_workers,
        }
    }

    fn progress_config(&self) -> Option<common::ProgressConfig> {
        if !self.progress && self.progress_delay.is_none() {
            return None;
        }
        let mut config = common::ProgressConfig::default();
        if let Some(delay) = self.progress_delay {
            config.delay = delay;
        }
        Some(config)
    }

    fn session_config(&self, remote: &RemotePath) -> SessionConfig {
        let mut config = SessionConfig::new(&remote.host);
        config.user = remote.user.clone();
        if let Some(port) = self.port.or(remote.port) {
            config.port = port;
        }
        if let Some(identity) = &self.identity {
            config.credential = Credential::IdentityFile(identity.clone());
        }
        if let Some(password) = &self.password {
            config.credential = Credential::Password(password.clone());
        }
        config.timeout = self.connect_timeout;
        config
    }

    fn pool_settings(&self, direction: Direction) -> PoolSettings {
        PoolSettings {
            pattern: self.pattern.clone(),
            worker_count: self.workers,
            transfer: TransferSettings {
                direction,
                retry: RetryPolicy {
                    max_attempts: self.retries,
                    delay: self.retry_delay,
                },
                poll_interval: self.poll_interval,
                io_timeout: self.io_timeout,
            },
            progress: self.progress_config(),
        }
    }
}

fn tool_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Push => "rpush",
        Direction::Pull => "rpull",
    }
}

/// Split `src`/`dst` into the local path, the remote path and the remote host
fn endpoints(
    direction: Direction,
    src: &str,
    dst: &str,
) -> anyhow::Result<(PathBuf, RemotePath)> {
    let src = parse_path(src)?;
    let dst = parse_path(dst)?;
    match (direction, src, dst) {
        (Direction::Push, Endpoint::Local(local), Endpoint::Remote(remote)) => Ok((local, remote)),
        (Direction::Pull, Endpoint::Remote(remote), Endpoint::Local(local)) => Ok((local, remote)),
        (Direction::Push, _, _) => Err(anyhow!(
            "rpush copies a local source to a remote destination: rpush <PATH> [user@]host[:port]:<PATH>"
        )),
        (Direction::Pull, _, _) => Err(anyhow!(
            "rpull copies a remote source to a local destination: rpull [user@]host[:port]:<PATH> <PATH>"
        )),
    }
}

/// Drive one push or pull run over SSH
///
/// Returns an error when any file could not be transferred; the summary is then part of the
/// message if it was requested.
#[instrument(skip(args))]
pub async fn run_transfer(
    args: TransferArgs,
    direction: Direction,
    src: String,
    dst: String,
) -> anyhow::Result<Summary> {
    let (local, remote) = endpoints(direction, &src, &dst)?;
    let config = args.session_config(&remote);
    let (root, dst_base) = match direction {
        Direction::Push => (local, remote.path),
        Direction::Pull => (remote.path, local),
    };
    let settings = args.pool_settings(direction);
    // only the embedded client can answer a password prompt
    let password_login = matches!(config.credential, Credential::Password(_));
    let summary = if password_login {
        run_with(EmbeddedConnector, config, settings, &root, &dst_base).await?
    } else {
        run_with(OpenSshConnector, config, settings, &root, &dst_base).await?
    };
    if summary.has_failures() {
        let name = tool_name(direction);
        if args.summary || args.verbose > 0 {
            return Err(anyhow!("{name} encountered errors\n\n{summary}"));
        }
        return Err(anyhow!("{name} encountered errors"));
    }
    Ok(summary)
}

async fn run_with<C: Connector>(
    connector: C,
    config: SessionConfig,
    settings: PoolSettings,
    root: &std::path::Path,
    dst_base: &std::path::Path,
) -> anyhow::Result<Summary> {
    let mut coordinator = Coordinator::new(connector, config, settings)?;
    coordinator.run(root, dst_base).await
}
