//! Remote host access for the rxfer tools
//!
//! [`session`] defines the capability the transfer engine consumes ([`Connector`] and
//! [`RemoteSession`]); [`ssh`] implements it on top of the system OpenSSH client and [`embedded`]
//! on an in-process client for password logins.

use anyhow::Context;

pub mod embedded;
pub mod session;
pub mod ssh;

pub use session::{
    CommandOutput, Connector, Credential, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, RemoteSession,
    SessionConfig,
};
pub use embedded::{EmbeddedConnector, EmbeddedSession};
pub use ssh::{OpenSshConnector, SshSession};

/// Quote a string for safe use as a single word in a POSIX shell command
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote a path for a remote shell command; remote paths must be valid UTF-8
pub fn escape_path(path: &std::path::Path) -> anyhow::Result<String> {
    let path = path
        .to_str()
        .with_context(|| format!("path {:?} is not valid UTF-8", path))?;
    Ok(shell_escape(path))
}
