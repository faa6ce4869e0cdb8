use std::sync::atomic::{AtomicU64, Ordering};

use tracing::instrument;

use crate::summary::Outcome;

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn add(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Live counters shared by all workers of a run
#[derive(Debug)]
pub struct Progress {
    pub files_transferred: Counter,
    pub files_skipped: Counter,
    pub files_failed: Counter,
    pub bytes_transferred: Counter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            files_transferred: Default::default(),
            files_skipped: Default::default(),
            files_failed: Default::default(),
            bytes_transferred: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Transferred { bytes } => {
                self.files_transferred.inc();
                self.bytes_transferred.add(bytes);
            }
            Outcome::Skipped => self.files_skipped.inc(),
            Outcome::SourceMissing | Outcome::Rejected | Outcome::Abandoned { .. } => {
                self.files_failed.inc()
            }
        }
    }

    /// Number of tasks that reached a final outcome
    pub fn finished(&self) -> u64 {
        self.files_transferred.get() + self.files_skipped.get() + self.files_failed.get()
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

fn progress_message(progress: &Progress) -> String {
    let elapsed = progress.get_duration().as_secs_f64().max(0.001);
    let bytes = progress.bytes_transferred.get();
    format!(
        "transferred: {} | skipped: {} | failed: {} | {} ({}/s)",
        progress.files_transferred.get(),
        progress.files_skipped.get(),
        progress.files_failed.get(),
        bytesize::ByteSize(bytes),
        bytesize::ByteSize((bytes as f64 / elapsed) as u64),
    )
}

/// Draw a progress bar on stderr until `done` is cancelled
#[instrument(skip(progress, done))]
pub async fn run_progress_bar(
    progress: std::sync::Arc<Progress>,
    total: u64,
    delay: std::time::Duration,
    done: tokio_util::sync::CancellationToken,
) {
    let bar = indicatif::ProgressBar::new(total);
    match indicatif::ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}",
    ) {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(error) => tracing::debug!("failed to set progress style: {error}"),
    }
    loop {
        bar.set_position(progress.finished());
        bar.set_message(progress_message(&progress));
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    bar.set_position(progress.finished());
    bar.finish_and_clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sorts_outcomes() {
        let progress = Progress::new();
        progress.record(Outcome::Transferred { bytes: 7 });
        progress.record(Outcome::Skipped);
        progress.record(Outcome::Rejected);
        progress.record(Outcome::Abandoned { attempts: 3 });
        assert_eq!(progress.files_transferred.get(), 1);
        assert_eq!(progress.bytes_transferred.get(), 7);
        assert_eq!(progress.files_skipped.get(), 1);
        assert_eq!(progress.files_failed.get(), 2);
        assert_eq!(progress.finished(), 4);
    }

    #[tokio::test]
    async fn progress_bar_stops_when_cancelled() {
        let progress = std::sync::Arc::new(Progress::new());
        let done = tokio_util::sync::CancellationToken::new();
        let task = tokio::spawn(run_progress_bar(
            progress.clone(),
            2,
            std::time::Duration::from_secs(3600),
            done.clone(),
        ));
        progress.record(Outcome::Skipped);
        done.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("progress bar did not stop")
            .unwrap();
    }
}
