use anyhow::Result;
use clap::Parser;

use rxfer_tools_rxfer::{Direction, TransferArgs, run_transfer};

#[derive(Parser, Debug)]
#[command(
    name = "rpull",
    version,
    about = "Pull a remote file tree to the local host over SSH",
    long_about = "`rpull` copies every regular file below a remote path whose name matches a glob to the local host, keeping the relative layout.

Files that disappear remotely before their turn are reported as missing, failed copies are retried. Each file is written under a temporary name and renamed once complete.

EXAMPLES:
    # Pull all logs from a remote directory
    rpull user@host:/var/log/app ./logs --pattern '*.log' --progress

    # Pull with 8 workers over an IPv6 address
    rpull 'root@[fd00::5]:/srv/data' /backup/data -j 8 --summary"
)]
struct Args {
    #[command(flatten)]
    transfer: TransferArgs,

    // ARGUMENTS
    /// Remote source file or directory: [user@]host[:port]:/path
    #[arg(value_name = "SRC")]
    src: String,

    /// Local destination directory
    #[arg(value_name = "DST")]
    dst: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = args.transfer.output();
    let runtime = args.transfer.runtime();
    let func = move || run_transfer(args.transfer, Direction::Pull, args.src, args.dst);
    let Some(summary) = common::run(output, runtime, func) else {
        std::process::exit(1);
    };
    if output.quiet {
        return Ok(());
    }
    if summary.root_missing {
        println!("source not found, nothing to transfer");
    } else {
        println!("all files {}", Direction::Pull.past_tense());
    }
    Ok(())
}
