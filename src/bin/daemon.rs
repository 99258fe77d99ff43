//! Marksync daemon
//!
//! Reconciles every configured bucket pair, sleeps for the configured
//! interval, and repeats until a cycle fails.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use marksync::config::{expand_path, DEFAULT_CONFIG_PATH};
use marksync::logging::{init_logging, LogFormat};
use marksync::storage::S3Connector;
use marksync::watch::SyncDaemon;

#[derive(Parser, Debug)]
#[command(name = "marksync-daemon")]
#[command(about = "Keep S3 bucket pairs synchronized")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "MARKSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log intended copies and marker writes without performing them
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    let path = expand_path(&args.config);
    tracing::info!(
        "Starting marksync {} with {}{}",
        marksync::VERSION,
        path.display(),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let mut daemon = SyncDaemon::new(path, Arc::new(S3Connector), args.dry_run);

    if args.once {
        return Ok(match daemon.run_cycle().await {
            Ok(report) => {
                if report.failures().is_empty() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => {
                daemon.report_fatal(&e).await;
                ExitCode::FAILURE
            }
        });
    }

    match daemon.run_forever().await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
