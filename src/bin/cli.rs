//! Marksync CLI
//!
//! One-shot operator commands against a configuration file.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use marksync::config::{expand_path, fingerprint_file, ConfigSnapshot, DEFAULT_CONFIG_PATH};
use marksync::logging::{init_logging, LogFormat};
use marksync::notify::{notifier_from_config, DisabledNotifier, Notifier};
use marksync::storage::{S3Connector, StoreConnector};
use marksync::sync::{backfill_all, Orchestrator, Reconciler};

#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "S3 bucket pair synchronization")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "MARKSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and list usable pairs
    Validate,
    /// Print the configuration fingerprint
    Fingerprint,
    /// Run one synchronization cycle
    Sync {
        /// Only this pair
        #[arg(short, long)]
        pair: Option<String>,
        /// Log intended actions without performing them
        #[arg(long)]
        dry_run: bool,
        /// Send outcomes to the configured notifier
        #[arg(long)]
        notify: bool,
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark source objects that already exist in the target
    Mark {
        /// Only this pair
        #[arg(short, long)]
        pair: Option<String>,
        /// Count what would be marked without writing
        #[arg(long)]
        dry_run: bool,
    },
}

fn load(path: &Path) -> anyhow::Result<ConfigSnapshot> {
    ConfigSnapshot::load(path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let path = expand_path(&cli.config);

    match cli.command {
        Commands::Validate => {
            let snapshot = load(&path)?;
            println!(
                "Interval: {}s, marker: {}={}",
                snapshot.policy.interval.as_secs(),
                snapshot.policy.marker.key(),
                snapshot.policy.marker.value()
            );
            for line in snapshot.summary() {
                println!("  ok       {}", line);
            }
            for rejection in &snapshot.rejected {
                println!("  rejected {}", rejection);
            }
            if snapshot.pairs.is_empty() {
                anyhow::bail!("no valid bucket pairs");
            }
        }
        Commands::Fingerprint => {
            let digest = fingerprint_file(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            println!("{}", digest);
        }
        Commands::Sync {
            pair,
            dry_run,
            notify,
            json,
        } => {
            let snapshot = load(&path)?.with_dry_run(dry_run);
            let pairs = snapshot.select(pair.as_deref())?;
            let notifier: Arc<dyn Notifier> = if notify {
                notifier_from_config(&snapshot.notify)
            } else {
                Arc::new(DisabledNotifier)
            };

            let reconciler =
                Reconciler::new(Arc::new(S3Connector), Arc::new(snapshot.policy.clone()));
            let report = Orchestrator::new(reconciler, notifier).run(&pairs).await;

            if json {
                println!("{}", report.to_json()?);
            } else {
                for outcome in &report.outcomes {
                    println!("{}", outcome);
                }
            }
            let failures = report.failures().len();
            if failures > 0 {
                anyhow::bail!("{} of {} pairs failed", failures, report.outcomes.len());
            }
        }
        Commands::Mark { pair, dry_run } => {
            let snapshot = load(&path)?;
            let pairs = snapshot.select(pair.as_deref())?;
            let connector: Arc<dyn StoreConnector> = Arc::new(S3Connector);
            let reports = backfill_all(
                connector,
                &pairs,
                &snapshot.policy.marker,
                dry_run,
                snapshot.policy.max_concurrent_pairs,
            )
            .await;

            for report in &reports {
                println!("{}", report.message());
            }
        }
    }

    Ok(())
}
