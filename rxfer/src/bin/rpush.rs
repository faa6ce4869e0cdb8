use anyhow::Result;
use clap::Parser;

use rxfer_tools_rxfer::{Direction, TransferArgs, run_transfer};

#[derive(Parser, Debug)]
#[command(
    name = "rpush",
    version,
    about = "Push a local file tree to a remote host over SSH",
    long_about = "`rpush` copies every regular file below a local path whose name matches a glob to a remote host, keeping the relative layout.

Files already present on the remote side are skipped, failed copies are retried.

EXAMPLES:
    # Push all text files below ./docs
    rpush ./docs user@host:/srv/docs --pattern '*.txt' --progress

    # Push a single file using a specific key and port
    rpush /data/report.pdf host:2222:/srv/reports -i ~/.ssh/backup_key --summary"
)]
struct Args {
    #[command(flatten)]
    transfer: TransferArgs,

    // ARGUMENTS
    /// Local source file or directory
    #[arg(value_name = "SRC")]
    src: String,

    /// Remote destination directory: [user@]host[:port]:/path
    #[arg(value_name = "DST")]
    dst: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = args.transfer.output();
    let runtime = args.transfer.runtime();
    let func = move || run_transfer(args.transfer, Direction::Push, args.src, args.dst);
    let Some(summary) = common::run(output, runtime, func) else {
        std::process::exit(1);
    };
    if output.quiet {
        return Ok(());
    }
    if summary.root_missing {
        println!("source not found, nothing to transfer");
    } else {
        println!("all files {}", Direction::Push.past_tense());
    }
    Ok(())
}
