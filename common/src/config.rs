//! Configuration types for runtime and output settings

/// Runtime configuration for the tokio thread pool
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Default tracing filter directive for the configured verbosity
    pub fn level_filter(&self) -> tracing::level_filters::LevelFilter {
        match self.verbose {
            0 => tracing::level_filters::LevelFilter::ERROR,
            1 => tracing::level_filters::LevelFilter::INFO,
            2 => tracing::level_filters::LevelFilter::DEBUG,
            _ => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Progress display configuration
#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    /// Delay between progress bar refreshes
    pub delay: std::time::Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_millis(200),
        }
    }
}
