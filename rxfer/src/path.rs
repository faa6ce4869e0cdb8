use std::path::PathBuf;

use anyhow::{Context, anyhow};

/// A path on the remote side: `[user@]host[:port]:/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub user: Option<String>,
    /// host name or address, IPv6 brackets removed
    pub host: String,
    pub port: Option<u16>,
    /// relative paths are resolved by the remote shell (usually against the home directory)
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(PathBuf),
    Remote(RemotePath),
}

impl Endpoint {
    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote(_))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Remote(remote) => {
                if let Some(user) = &remote.user {
                    write!(f, "{user}@")?;
                }
                if remote.host.contains(':') {
                    write!(f, "[{}]", remote.host)?;
                } else {
                    write!(f, "{}", remote.host)?;
                }
                if let Some(port) = remote.port {
                    write!(f, ":{port}")?;
                }
                write!(f, ":{}", remote.path.display())
            }
        }
    }
}

fn remote_path_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"^(?:(?P<user>[^@/]+)@)?(?P<host>\[[^\]]+\]|[^:\[\]/@]+)(?::(?P<port>\d+))?:(?P<path>.+)$",
        )
        .expect("remote path regex is valid")
    })
}

/// Classify a command line path as local or remote
///
/// Paths starting with `/`, `./` or `../` are always local, so a local file whose name contains
/// a colon can still be addressed.
pub fn parse_path(path: &str) -> anyhow::Result<Endpoint> {
    if path.is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    if path.starts_with('/') || path.starts_with("./") || path.starts_with("../") {
        return Ok(Endpoint::Local(path.into()));
    }
    let Some(captures) = remote_path_regex().captures(path) else {
        return Ok(Endpoint::Local(path.into()));
    };
    let user = captures.name("user").map(|m| m.as_str().to_string());
    let host = captures
        .name("host")
        .map(|m| m.as_str().trim_start_matches('[').trim_end_matches(']'))
        .context("remote path is missing a host")?;
    if host.is_empty() {
        return Err(anyhow!("remote path {path:?} has an empty host"));
    }
    let port = match captures.name("port") {
        Some(port) => Some(
            port.as_str()
                .parse::<u16>()
                .with_context(|| format!("invalid port in {path:?}"))?,
        ),
        None => None,
    };
    let remote_path = captures
        .name("path")
        .map(|m| m.as_str())
        .context("remote path is missing the file system path")?;
    Ok(Endpoint::Remote(RemotePath {
        user,
        host: host.to_string(),
        port,
        path: remote_path.into(),
    }))
}
