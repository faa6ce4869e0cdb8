//! Coordinator: enumerate, fan out to a fixed pool of workers, drain, stop
//!
//! One [`Coordinator`] drives exactly one run through the phases
//! `Idle -> Enumerating -> Draining -> Stopping -> Done`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use common::filter::NamePattern;
use common::progress::Progress;
use common::{ProgressConfig, Summary};
use remote::{Connector, RemoteSession, SessionConfig};
use tracing::instrument;

use crate::enumerate;
use crate::queue::WorkQueue;
use crate::task::{Direction, TransferTask};
use crate::worker::{TransferSettings, TransferWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Enumerating,
    Draining,
    Stopping,
    Done,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub pattern: NamePattern,
    pub worker_count: usize,
    pub transfer: TransferSettings,
    /// draw a progress bar when set
    pub progress: Option<ProgressConfig>,
}

pub struct Coordinator<C: Connector> {
    connector: Arc<C>,
    config: Arc<SessionConfig>,
    settings: PoolSettings,
    phase: Phase,
}

impl<C: Connector> Coordinator<C> {
    pub fn new(connector: C, config: SessionConfig, settings: PoolSettings) -> anyhow::Result<Self> {
        if settings.worker_count == 0 {
            return Err(anyhow!("number of workers must be at least 1"));
        }
        if settings.transfer.retry.max_attempts == 0 {
            return Err(anyhow!("number of attempts must be at least 1"));
        }
        Ok(Self {
            connector: Arc::new(connector),
            config: Arc::new(config),
            settings,
            phase: Phase::Idle,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Transfer every file under `root` matching the pattern into `dst_base`
    ///
    /// A missing root is logged and yields an empty summary flagged with
    /// [`Summary::root_missing`]; per-file failures are part of the returned summary, not errors.
    #[instrument(skip(self), fields(direction = %self.settings.transfer.direction))]
    pub async fn run(&mut self, root: &Path, dst_base: &Path) -> anyhow::Result<Summary> {
        if self.phase != Phase::Idle {
            return Err(anyhow!("coordinator already ran"));
        }
        self.enter(Phase::Enumerating);
        let tasks = match self.enumerate(root, dst_base).await {
            Ok(tasks) => tasks,
            Err(enumerate::Error::NotFound(path)) => {
                tracing::error!("source {:?} does not exist, nothing to transfer", path);
                self.enter(Phase::Done);
                return Ok(Summary::nothing_found());
            }
            Err(enumerate::Error::Other(error)) => {
                self.enter(Phase::Done);
                return Err(error);
            }
        };
        let summary = self.run_tasks(tasks).await;
        self.enter(Phase::Done);
        summary
    }

    async fn enumerate(
        &self,
        root: &Path,
        dst_base: &Path,
    ) -> Result<Vec<TransferTask>, enumerate::Error> {
        match self.settings.transfer.direction {
            Direction::Push => enumerate::local(root, &self.settings.pattern, dst_base).await,
            Direction::Pull => {
                let session = self
                    .connector
                    .connect(&self.config)
                    .await
                    .with_context(|| format!("failed connecting to {} for listing", self.config))?;
                let tasks =
                    enumerate::remote(&session, root, &self.settings.pattern, dst_base).await;
                if let Err(error) = session.close().await {
                    tracing::debug!("{:#}", error);
                }
                tasks
            }
        }
    }

    async fn run_tasks(&mut self, tasks: Vec<TransferTask>) -> anyhow::Result<Summary> {
        let total = tasks.len();
        let queue = Arc::new(WorkQueue::new());
        for task in tasks {
            queue.submit(task)?;
        }
        tracing::info!(
            "{} files to {}, {} workers",
            total,
            self.settings.transfer.direction,
            self.settings.worker_count
        );
        let stop = tokio_util::sync::CancellationToken::new();
        let progress = Arc::new(Progress::new());
        let progress_done = tokio_util::sync::CancellationToken::new();
        let progress_task = self.settings.progress.map(|config| {
            tokio::spawn(common::progress::run_progress_bar(
                progress.clone(),
                total as u64,
                config.delay,
                progress_done.clone(),
            ))
        });
        let mut workers = tokio::task::JoinSet::new();
        for id in 0..self.settings.worker_count {
            let worker = TransferWorker {
                id,
                queue: queue.clone(),
                connector: self.connector.clone(),
                config: self.config.clone(),
                settings: self.settings.transfer,
                stop: stop.clone(),
                progress: progress.clone(),
            };
            workers.spawn(worker.run());
        }
        self.enter(Phase::Draining);
        let mut summary = Summary::default();
        let mut drained = true;
        {
            let drain = queue.await_drain();
            tokio::pin!(drain);
            loop {
                tokio::select! {
                    _ = &mut drain => break,
                    res = workers.join_next() => match res {
                        Some(res) => summary += worker_summary(res),
                        None => {
                            drained = false;
                            break;
                        }
                    },
                }
            }
        }
        self.enter(Phase::Stopping);
        stop.cancel();
        while let Some(res) = workers.join_next().await {
            summary += worker_summary(res);
        }
        progress_done.cancel();
        if let Some(task) = progress_task {
            let res = task.await;
            if let Err(error) = res {
                tracing::debug!("progress bar task failed: {}", error);
            }
        }
        if !drained {
            return Err(anyhow!(
                "all workers exited with {} tasks still pending",
                queue.pending()
            ));
        }
        tracing::info!("all files {}", self.settings.transfer.direction.past_tense());
        Ok(summary)
    }
}

fn worker_summary(res: Result<Summary, tokio::task::JoinError>) -> Summary {
    match res {
        Ok(summary) => summary,
        Err(error) => {
            tracing::error!("worker failed: {}", error);
            Summary::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{self, LoopbackConnector};
    use crate::worker::RetryPolicy;
    use std::time::Duration;

    fn settings(direction: Direction, pattern: &str, workers: usize) -> PoolSettings {
        PoolSettings {
            pattern: NamePattern::parse(pattern).unwrap(),
            worker_count: workers,
            transfer: TransferSettings {
                direction,
                retry: RetryPolicy {
                    max_attempts: 3,
                    delay: Duration::from_millis(10),
                },
                poll_interval: Duration::from_millis(50),
                io_timeout: Duration::from_secs(5),
            },
            progress: None,
        }
    }

    fn coordinator(
        connector: LoopbackConnector,
        settings: PoolSettings,
    ) -> Coordinator<LoopbackConnector> {
        Coordinator::new(connector, SessionConfig::new("loopback"), settings).unwrap()
    }

    #[test]
    fn rejects_zero_workers_and_attempts() {
        let res = Coordinator::new(
            LoopbackConnector::default(),
            SessionConfig::new("loopback"),
            settings(Direction::Push, "*", 0),
        );
        assert!(res.is_err());
        let mut no_attempts = settings(Direction::Push, "*", 1);
        no_attempts.transfer.retry.max_attempts = 0;
        let res = Coordinator::new(
            LoopbackConnector::default(),
            SessionConfig::new("loopback"),
            no_attempts,
        );
        assert!(res.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn push_then_push_again_skips_everything() {
        let tmp = testutils::sample_tree().await.unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let mut first = coordinator(
            LoopbackConnector::default(),
            settings(Direction::Push, "*.txt", 3),
        );
        assert_eq!(first.phase(), Phase::Idle);
        let summary = first.run(&src, &dst).await.unwrap();
        assert_eq!(first.phase(), Phase::Done);
        assert_eq!(summary.files_transferred, 3);
        assert_eq!(summary.bytes_transferred, 18);
        assert!(dst.join("sub/dir/f.txt").exists());
        assert!(!dst.join("b.log").exists());
        let mut second = coordinator(
            LoopbackConnector::default(),
            settings(Direction::Push, "*.txt", 3),
        );
        let summary = second.run(&src, &dst).await.unwrap();
        assert_eq!(summary.files_transferred, 0);
        assert_eq!(summary.files_skipped, 3);
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn pull_mirrors_remote_tree() {
        let tmp = testutils::sample_tree().await.unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("pulled");
        let mut pool = coordinator(
            LoopbackConnector::default(),
            settings(Direction::Pull, "*.log", 2),
        );
        let summary = pool.run(&src, &dst).await.unwrap();
        assert_eq!(summary.files_transferred, 2);
        assert_eq!(
            tokio::fs::read_to_string(dst.join("sub/dir/g.log"))
                .await
                .unwrap(),
            "g.log\n"
        );
        assert!(!dst.join("a.txt").exists());
    }

    #[tokio::test]
    async fn missing_root_starts_no_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = LoopbackConnector::default();
        let faults = connector.faults.clone();
        let mut pool = coordinator(connector, settings(Direction::Push, "*", 2));
        let summary = pool
            .run(&tmp.path().join("missing"), &tmp.path().join("dst"))
            .await
            .unwrap();
        assert_eq!(summary, Summary::nothing_found());
        assert!(summary.root_missing);
        assert_eq!(faults.connects(), 0);
        assert_eq!(pool.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn empty_match_drains_immediately() {
        let tmp = testutils::sample_tree().await.unwrap();
        let mut pool = coordinator(
            LoopbackConnector::default(),
            settings(Direction::Push, "*.none", 4),
        );
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            pool.run(&tmp.path().join("src"), &tmp.path().join("dst")),
        )
        .await
        .expect("run with no tasks should finish right away")
        .unwrap();
        assert_eq!(summary.files_total(), 0);
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_for_poll_interval() {
        let tmp = testutils::sample_tree().await.unwrap();
        let mut slow_poll = settings(Direction::Push, "*", 4);
        slow_poll.transfer.poll_interval = Duration::from_secs(3600);
        let mut pool = coordinator(LoopbackConnector::default(), slow_poll);
        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            pool.run(&tmp.path().join("src"), &tmp.path().join("dst")),
        )
        .await
        .expect("workers should stop as soon as the queue drains")
        .unwrap();
        assert_eq!(summary.files_transferred, 5);
    }

    #[tokio::test]
    async fn failures_are_counted_not_raised() {
        let tmp = testutils::sample_tree().await.unwrap();
        let mut pool = coordinator(
            LoopbackConnector::failing_copies(usize::MAX),
            settings(Direction::Push, "a.txt", 1),
        );
        let summary = pool
            .run(&tmp.path().join("src"), &tmp.path().join("dst"))
            .await
            .unwrap();
        assert_eq!(summary.files_abandoned, 1);
        assert_eq!(summary.attempts_failed, 3);
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn coordinator_runs_once() {
        let tmp = testutils::sample_tree().await.unwrap();
        let mut pool = coordinator(
            LoopbackConnector::default(),
            settings(Direction::Push, "*.none", 1),
        );
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        pool.run(&src, &dst).await.unwrap();
        assert!(pool.run(&src, &dst).await.is_err());
    }
}
