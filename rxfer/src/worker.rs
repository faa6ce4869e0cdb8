//! Transfer workers
//!
//! A worker takes one task at a time from the shared [`WorkQueue`], moves the file with
//! skip-if-present semantics and bounded retries, and completes the task whatever the outcome.
//! Per-task failures are logged and counted, they never stop the worker.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use common::progress::Progress;
use common::{Outcome, Summary};
use remote::{Connector, RemoteSession, SessionConfig};
use tracing::instrument;

use crate::queue::{TakeError, WorkQueue};
use crate::task::{Direction, TransferTask};

/// How often a failed transfer is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// pause between attempts, never applied after the last one
    pub delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: std::time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub direction: Direction,
    pub retry: RetryPolicy,
    /// how long an idle worker waits for a task before checking the stop signal again
    pub poll_interval: std::time::Duration,
    /// inactivity bound for each read/write of a copy
    pub io_timeout: std::time::Duration,
}

impl TransferSettings {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            retry: RetryPolicy::default(),
            poll_interval: std::time::Duration::from_secs(5),
            io_timeout: std::time::Duration::from_secs(60),
        }
    }
}

/// What happened to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub outcome: Outcome,
    /// connection attempts made
    pub attempts: usize,
    pub failed_attempts: usize,
}

impl TransferReport {
    pub fn summary(&self) -> Summary {
        Summary {
            attempts_failed: self.failed_attempts,
            ..Summary::from_outcome(self.outcome)
        }
    }
}

async fn check_local_source(path: &Path) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {path:?} for reading"))?;
    let metadata = file
        .metadata()
        .await
        .with_context(|| format!("failed reading metadata from {path:?}"))?;
    if !metadata.is_file() {
        return Err(anyhow::anyhow!("{path:?} is not a regular file"));
    }
    Ok(())
}

async fn create_local_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create local directory {parent:?}"))?;
    }
    Ok(())
}

async fn push_file<S: RemoteSession>(
    session: &S,
    task: &TransferTask,
    io_timeout: std::time::Duration,
) -> anyhow::Result<Outcome> {
    let destination = task.destination();
    if session.exists(destination).await? {
        tracing::info!("{:?} skipped, already present", destination);
        return Ok(Outcome::Skipped);
    }
    if let Some(parent) = destination.parent() {
        session.mkdir_p(parent).await?;
    }
    let bytes = session
        .copy_to_remote(task.source(), destination, io_timeout)
        .await
        .with_context(|| format!("failed pushing {task}"))?;
    Ok(Outcome::Transferred { bytes })
}

async fn pull_file<S: RemoteSession>(
    session: &S,
    task: &TransferTask,
    io_timeout: std::time::Duration,
) -> anyhow::Result<Outcome> {
    let source = task.source();
    if !session.exists(source).await? {
        tracing::warn!("remote source {:?} missing", source);
        return Ok(Outcome::SourceMissing);
    }
    create_local_parent(task.destination()).await?;
    let bytes = session
        .copy_from_remote(source, task.destination(), io_timeout)
        .await
        .with_context(|| format!("failed pulling {task}"))?;
    Ok(Outcome::Transferred { bytes })
}

/// One connect-check-copy cycle; the session is closed on every path
async fn attempt<C: Connector>(
    connector: &C,
    config: &SessionConfig,
    task: &TransferTask,
    settings: &TransferSettings,
) -> anyhow::Result<Outcome> {
    let session = connector
        .connect(config)
        .await
        .with_context(|| format!("failed connecting to {config}"))?;
    let res = match settings.direction {
        Direction::Push => push_file(&session, task, settings.io_timeout).await,
        Direction::Pull => pull_file(&session, task, settings.io_timeout).await,
    };
    if let Err(error) = session.close().await {
        tracing::debug!("{:#}", error);
    }
    res
}

/// Move one file, retrying failed attempts according to `settings.retry`
#[instrument(skip(connector, config, settings), fields(task = %task))]
pub async fn transfer_with_retry<C: Connector>(
    connector: &C,
    config: &SessionConfig,
    task: &TransferTask,
    settings: &TransferSettings,
) -> TransferReport {
    if settings.direction == Direction::Push {
        let checked = check_local_source(task.source()).await;
        if let Err(error) = checked {
            tracing::error!("{:#}", error);
            return TransferReport {
                outcome: Outcome::Rejected,
                attempts: 0,
                failed_attempts: 0,
            };
        }
    }
    let max_attempts = settings.retry.max_attempts.max(1);
    let mut failed_attempts = 0;
    for attempt_number in 1..=max_attempts {
        match attempt(connector, config, task, settings).await {
            Ok(outcome) => {
                return TransferReport {
                    outcome,
                    attempts: attempt_number,
                    failed_attempts,
                };
            }
            Err(error) => {
                failed_attempts += 1;
                tracing::error!(
                    "attempt {}/{} failed: {:#}",
                    attempt_number,
                    max_attempts,
                    error
                );
                if attempt_number < max_attempts {
                    tokio::time::sleep(settings.retry.delay).await;
                }
            }
        }
    }
    tracing::error!("{}: retries exhausted", task);
    TransferReport {
        outcome: Outcome::Abandoned {
            attempts: max_attempts,
        },
        attempts: max_attempts,
        failed_attempts,
    }
}

pub struct TransferWorker<C: Connector> {
    pub id: usize,
    pub queue: Arc<WorkQueue>,
    pub connector: Arc<C>,
    pub config: Arc<SessionConfig>,
    pub settings: TransferSettings,
    pub stop: tokio_util::sync::CancellationToken,
    pub progress: Arc<Progress>,
}

impl<C: Connector> TransferWorker<C> {
    /// Process tasks until the stop signal fires, returning what this worker did
    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn run(self) -> Summary {
        let mut summary = Summary::default();
        loop {
            let taken = match self
                .queue
                .take(self.settings.poll_interval, &self.stop)
                .await
            {
                Ok(taken) => taken,
                Err(TakeError::TimedOut(_)) => continue,
                Err(TakeError::Stopped) => {
                    tracing::debug!("stop requested, exiting");
                    break;
                }
                Err(error @ TakeError::Closed) => {
                    tracing::error!("worker {} exiting: {}", self.id, error);
                    break;
                }
            };
            let report =
                transfer_with_retry(&*self.connector, &self.config, taken.task(), &self.settings)
                    .await;
            self.progress.record(report.outcome);
            summary += report.summary();
            taken.complete();
        }
        summary
    }
}
