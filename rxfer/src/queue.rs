//! Shared FIFO of transfer tasks with a drain barrier
//!
//! Producers [`submit`](WorkQueue::submit) tasks, workers [`take`](WorkQueue::take) them one at a
//! time and the coordinator waits in [`await_drain`](WorkQueue::await_drain) until every submitted
//! task was completed. `take` hands out a [`Taken`] guard; the pending count drops when the guard
//! is completed or dropped, so a failed transfer can never leave the barrier hanging.

use anyhow::anyhow;

use crate::task::TransferTask;

#[derive(Debug, thiserror::Error)]
pub enum TakeError {
    /// nothing arrived in time, poll again
    #[error("no task arrived within {0:?}")]
    TimedOut(std::time::Duration),
    /// the stop signal fired while waiting
    #[error("stop requested")]
    Stopped,
    #[error("work queue closed")]
    Closed,
}

#[derive(Debug)]
pub struct WorkQueue {
    sender: async_channel::Sender<TransferTask>,
    receiver: async_channel::Receiver<TransferTask>,
    // number of submitted tasks not completed yet
    pending: tokio::sync::watch::Sender<usize>,
}

/// A task removed from the queue; completes it exactly once
#[derive(Debug)]
pub struct Taken<'a> {
    queue: &'a WorkQueue,
    task: TransferTask,
}

impl Taken<'_> {
    pub fn task(&self) -> &TransferTask {
        &self.task
    }

    /// Mark the task done, whatever its outcome was
    pub fn complete(self) {
        // Drop does the bookkeeping
    }
}

impl Drop for Taken<'_> {
    fn drop(&mut self) {
        self.queue.complete_one();
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        let (pending, _) = tokio::sync::watch::channel(0);
        Self {
            sender,
            receiver,
            pending,
        }
    }

    /// Append a task; never blocks
    pub fn submit(&self, task: TransferTask) -> anyhow::Result<()> {
        // count first so a fast worker cannot complete the task before it is accounted for
        self.pending.send_modify(|pending| *pending += 1);
        if let Err(error) = self.sender.try_send(task) {
            self.complete_one();
            return Err(anyhow!(
                "failed to submit {}: work queue closed",
                error.into_inner()
            ));
        }
        Ok(())
    }

    /// Remove the oldest task, waiting at most `timeout` for one to show up
    ///
    /// A cancelled `stop` token interrupts the wait immediately.
    pub async fn take(
        &self,
        timeout: std::time::Duration,
        stop: &tokio_util::sync::CancellationToken,
    ) -> Result<Taken<'_>, TakeError> {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Err(TakeError::Stopped),
            res = tokio::time::timeout(timeout, self.receiver.recv()) => match res {
                Err(_) => Err(TakeError::TimedOut(timeout)),
                Ok(Err(_)) => Err(TakeError::Closed),
                Ok(Ok(task)) => Ok(Taken { queue: self, task }),
            },
        }
    }

    fn complete_one(&self) {
        let decremented = self.pending.send_if_modified(|pending| {
            if *pending == 0 {
                return false;
            }
            *pending -= 1;
            true
        });
        if !decremented {
            tracing::error!("task completed while none were pending");
        }
    }

    /// Block until every submitted task was completed
    ///
    /// Returns immediately when nothing is pending.
    pub async fn await_drain(&self) {
        let mut pending = self.pending.subscribe();
        // the sender is owned by self, so the channel cannot close while we wait
        if pending.wait_for(|pending| *pending == 0).await.is_err() {
            tracing::error!("pending counter closed while waiting for drain");
        }
    }

    /// Close the queue; waiting and future `take` calls fail with [`TakeError::Closed`]
    /// once the remaining tasks are gone
    pub fn close(&self) {
        self.sender.close();
    }

    /// Submitted tasks not completed yet
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Tasks waiting to be taken
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn task(n: usize) -> TransferTask {
        TransferTask::new(format!("/src/{n}"), format!("/dst/{n}"))
    }

    #[tokio::test]
    async fn take_returns_tasks_in_insertion_order() {
        let queue = WorkQueue::new();
        let stop = CancellationToken::new();
        for n in 0..3 {
            queue.submit(task(n)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        for n in 0..3 {
            let taken = queue.take(Duration::from_secs(1), &stop).await.unwrap();
            assert_eq!(taken.task(), &task(n));
            taken.complete();
        }
        assert!(queue.is_empty());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn take_times_out_on_empty_queue() {
        let queue = WorkQueue::new();
        let stop = CancellationToken::new();
        let res = queue.take(Duration::from_millis(20), &stop).await;
        assert!(matches!(res, Err(TakeError::TimedOut(_))));
    }

    #[tokio::test]
    async fn stop_interrupts_a_pending_take() {
        let queue = Arc::new(WorkQueue::new());
        let stop = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let res = queue.take(Duration::from_secs(60), &stop).await;
                (matches!(res, Err(TakeError::Stopped)), started.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        let (stopped, elapsed) = waiter.await.unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let queue = WorkQueue::new();
        let stop = CancellationToken::new();
        queue.close();
        let res = queue.take(Duration::from_secs(1), &stop).await;
        assert!(matches!(res, Err(TakeError::Closed)));
        assert!(queue.submit(task(0)).is_err());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_nothing_submitted() {
        let queue = WorkQueue::new();
        tokio::time::timeout(Duration::from_secs(1), queue.await_drain())
            .await
            .expect("drain should not block on an empty queue");
    }

    #[tokio::test]
    async fn drop_completes_the_task() {
        let queue = WorkQueue::new();
        let stop = CancellationToken::new();
        queue.submit(task(0)).unwrap();
        {
            let _taken = queue.take(Duration::from_secs(1), &stop).await.unwrap();
            assert_eq!(queue.pending(), 1);
        }
        assert_eq!(queue.pending(), 0);
        queue.await_drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_waits_for_every_completion() {
        const TASKS: usize = 50;
        const WORKERS: usize = 4;
        let queue = Arc::new(WorkQueue::new());
        let stop = CancellationToken::new();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for n in 0..TASKS {
            queue.submit(task(n)).unwrap();
        }
        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..WORKERS {
            let queue = queue.clone();
            let stop = stop.clone();
            let completed = completed.clone();
            workers.spawn(async move {
                loop {
                    match queue.take(Duration::from_millis(10), &stop).await {
                        Ok(taken) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            taken.complete();
                        }
                        Err(TakeError::TimedOut(_)) => continue,
                        Err(_) => break,
                    }
                }
            });
        }
        queue.await_drain().await;
        assert_eq!(
            completed.load(std::sync::atomic::Ordering::SeqCst),
            TASKS
        );
        assert_eq!(queue.pending(), 0);
        stop.cancel();
        while let Some(res) = workers.join_next().await {
            res.unwrap();
        }
    }
}
