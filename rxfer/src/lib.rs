//! Bulk file transfer over SSH - `rpush` (local to remote) and `rpull` (remote to local)
//!
//! Both tools walk a tree, keep the regular files whose base name matches a glob and copy them
//! to the other side with a fixed pool of concurrent workers. Files already present at the
//! destination are skipped, failed copies are retried with a delay.
//!
//! # Tools
//!
//! ```bash
//! # push every .csv below /data to a remote host
//! rpush /data alice@backup:/srv/data --pattern '*.csv' --progress
//!
//! # pull a remote tree with 8 workers, connecting on port 2222
//! rpull backup:2222:/srv/data ./restore -j 8 --summary
//! ```
//!
//! Remote paths use `[user@]host[:port]:/path`; IPv6 hosts go in brackets. Authentication goes
//! through the system `ssh` client, so agents, `~/.ssh/config` and `-i/--identity` all work;
//! `--password` (or `RXFER_PASSWORD`) switches to a built-in client that can log in with a
//! password.
//!
//! # Semantics
//!
//! - **Skip-if-present**: a push never overwrites an existing remote file; a pull of a file that
//!   vanished remotely is reported as missing and not retried.
//! - **Retries**: every other failure (connect, directory creation, copy) is retried up to
//!   `--retries` attempts with `--retry-delay` in between. A file that still fails is reported
//!   and the run goes on.
//! - **Atomic placement**: copies land in a hidden temporary sibling first and are renamed into
//!   place once complete.
//! - **Exit status**: non-zero when any file was abandoned, rejected or missing.
//!
//! # Architecture
//!
//! ```text
//! Coordinator (pool)
//! ├── enumerate (local walk or remote `find`) → WorkQueue
//! ├── TransferWorker × N ── take → connect → check → mkdir → copy → close → complete
//! └── await_drain → stop → join
//! ```
//!
//! Every worker opens its own SSH session per file; sessions are never shared.

pub mod cli;
pub mod enumerate;
pub mod path;
pub mod pool;
pub mod queue;
pub mod task;
pub mod worker;

#[cfg(test)]
mod testutils;

pub use cli::{TransferArgs, run_transfer};
pub use pool::{Coordinator, Phase, PoolSettings};
pub use queue::{TakeError, Taken, WorkQueue};
pub use task::{Direction, TransferTask};
pub use worker::{RetryPolicy, TransferReport, TransferSettings, TransferWorker};
