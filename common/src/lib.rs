//! Common utilities shared by the rxfer tools
//!
//! This crate holds the pieces every rxfer binary needs regardless of transfer direction:
//!
//! - [`filter`]: glob matching of file base names
//! - [`summary`]: per-file outcomes and the aggregated run summary
//! - [`progress`]: live counters and an optional progress bar
//! - [`config`]: output and runtime configuration
//! - [`run`]: builds the tokio runtime, installs logging and drives the tool's async main
//!
//! # Logging
//!
//! Logs go to stdout through `tracing-subscriber`; the default level follows `-v` (ERROR, INFO,
//! DEBUG, TRACE) and `RUST_LOG` overrides it. The progress bar is drawn on stderr so logs can be
//! piped while watching progress.

pub mod config;
pub mod filter;
pub mod progress;
pub mod summary;

pub use config::{OutputConfig, ProgressConfig, RuntimeConfig};
pub use summary::{Outcome, Summary};

fn init_tracing(output: &OutputConfig) {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(output.level_filter().into())
        .from_env_lossy();
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {error}");
    }
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    Ok(builder.build()?)
}

/// Run a tool's async main on a freshly built runtime
///
/// Returns `None` when the tool failed, in which case the error was already reported (unless
/// quiet mode is on) and the caller is expected to exit with a non-zero status.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Failed to start the async runtime: {error:#}");
            return None;
        }
    };
    let res = runtime.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_summary_on_success() {
        let res = run(
            OutputConfig::default(),
            RuntimeConfig { max_workers: 1 },
            || async { Ok::<_, anyhow::Error>(Summary::default()) },
        );
        assert_eq!(res, Some(Summary::default()));
    }

    #[test]
    fn run_returns_none_on_error() {
        let res: Option<Summary> = run(
            OutputConfig {
                quiet: true,
                ..Default::default()
            },
            RuntimeConfig::default(),
            || async { Err(anyhow::anyhow!("boom")) },
        );
        assert!(res.is_none());
    }
}
