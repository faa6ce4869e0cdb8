/// Per-file result of a transfer, as reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// file copied, with the number of bytes moved
    Transferred { bytes: u64 },
    /// destination already present, nothing to do
    Skipped,
    /// remote source vanished before it could be pulled
    SourceMissing,
    /// local source missing or unreadable
    Rejected,
    /// every attempt failed
    Abandoned { attempts: usize },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::SourceMissing | Outcome::Rejected | Outcome::Abandoned { .. }
        )
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_transferred: usize,
    pub files_skipped: usize,
    pub sources_missing: usize,
    pub files_rejected: usize,
    pub files_abandoned: usize,
    /// attempts that failed, including ones later retried successfully
    pub attempts_failed: usize,
    /// the source root did not exist, so nothing was enumerated
    pub root_missing: bool,
}

impl Summary {
    #[must_use]
    pub fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Transferred { bytes } => Self {
                bytes_transferred: bytes,
                files_transferred: 1,
                ..Default::default()
            },
            Outcome::Skipped => Self {
                files_skipped: 1,
                ..Default::default()
            },
            Outcome::SourceMissing => Self {
                sources_missing: 1,
                ..Default::default()
            },
            Outcome::Rejected => Self {
                files_rejected: 1,
                ..Default::default()
            },
            Outcome::Abandoned { .. } => Self {
                files_abandoned: 1,
                ..Default::default()
            },
        }
    }

    /// Total number of tasks accounted for
    pub fn files_total(&self) -> usize {
        self.files_transferred
            + self.files_skipped
            + self.sources_missing
            + self.files_rejected
            + self.files_abandoned
    }

    /// Missing root: returned instead of the usual (empty) summary
    #[must_use]
    pub fn nothing_found() -> Self {
        Self {
            root_missing: true,
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.sources_missing + self.files_rejected + self.files_abandoned > 0
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_transferred: self.files_transferred + other.files_transferred,
            files_skipped: self.files_skipped + other.files_skipped,
            sources_missing: self.sources_missing + other.sources_missing,
            files_rejected: self.files_rejected + other.files_rejected,
            files_abandoned: self.files_abandoned + other.files_abandoned,
            attempts_failed: self.attempts_failed + other.attempts_failed,
            root_missing: self.root_missing || other.root_missing,
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.root_missing {
            writeln!(f, "source not found, nothing transferred")?;
        }
        write!(
            f,
            "bytes transferred: {}\n\
            files transferred: {}\n\
            files skipped: {}\n\
            sources missing: {}\n\
            files rejected: {}\n\
            files abandoned: {}\n\
            failed attempts: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.files_transferred,
            self.files_skipped,
            self.sources_missing,
            self.files_rejected,
            self.files_abandoned,
            self.attempts_failed,
        )
    }
}
