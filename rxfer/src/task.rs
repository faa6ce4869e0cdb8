use std::path::{Path, PathBuf};

/// Which way files flow relative to the local host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// local to remote
    Push,
    /// remote to local
    Pull,
}

impl Direction {
    pub fn past_tense(&self) -> &'static str {
        match self {
            Direction::Push => "pushed",
            Direction::Pull => "pulled",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

/// One file to move: a source path and where it should end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    source: PathBuf,
    destination: PathBuf,
}

impl TransferTask {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

impl std::fmt::Display for TransferTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.source.display(),
            self.destination.display()
        )
    }
}
