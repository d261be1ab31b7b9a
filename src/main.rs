use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use subwatch::config;
use subwatch::engine::{SyncEngine, SyncOutcome};
use subwatch::gate::SchedulerGate;
use subwatch::model::RecordDetails;
use subwatch::store::sqlite::{self, SqliteStore};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass
    Sync {
        /// Bypass the daily marker and refresh every notification
        #[arg(long)]
        force: bool,
    },
    /// Run reconciliation passes on an interval
    Watch,
    /// Print current notifications, most urgent first
    List {
        /// Only unread entries
        #[arg(long)]
        unread: bool,
    },
    /// Mark a notification read
    MarkRead {
        id: Option<String>,
        /// Mark every notification read
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Set the highlighted flag on a notification
    Highlight {
        id: String,
        /// Clear the flag instead
        #[arg(long)]
        off: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/subwatch.db", cfg.app.data_dir));

    let pool = sqlite::init_pool(&database_url).await?;
    sqlite::run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let gate = SchedulerGate::new(store.clone(), cfg.sync.marker_key.clone());
    let engine = SyncEngine::new(store.clone(), gate, cfg.sync.horizon_days);

    match args.command {
        Command::Sync { force } => {
            let outcome = if force {
                engine.force_sync().await?
            } else {
                engine.sync(false).await?
            };
            log_outcome(&outcome);
        }
        Command::Watch => {
            let interval = Duration::from_secs(cfg.app.poll_interval_secs);
            info!(
                interval_secs = cfg.app.poll_interval_secs,
                "watching for expirations"
            );
            loop {
                match engine.sync(false).await {
                    Ok(outcome) => log_outcome(&outcome),
                    Err(err) => error!(?err, "reconciliation pass failed"),
                }
                tokio::time::sleep(interval).await;
            }
        }
        Command::List { unread } => {
            let notifications = store.list_notifications(unread).await?;
            for n in &notifications {
                println!(
                    "{}  [{:>8}] {:>5}d {}{} {}",
                    n.id,
                    n.priority.as_str(),
                    n.days_remaining,
                    if n.read { ' ' } else { '*' },
                    if n.highlighted { '!' } else { ' ' },
                    describe(&n.details),
                );
            }
            println!("{} unread", store.count_unread().await?);
        }
        Command::MarkRead { id, all } => {
            if all {
                let marked = store.mark_all_read().await?;
                println!("{marked} marked read");
            } else if let Some(id) = id {
                store.mark_read(&id).await?;
            } else {
                anyhow::bail!("pass a notification id or --all");
            }
        }
        Command::Highlight { id, off } => {
            store.set_highlighted(&id, !off).await?;
        }
    }
    Ok(())
}

fn log_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(r) => info!(
            created = r.created,
            updated = r.updated,
            unchanged = r.unchanged,
            skipped = r.skipped_no_expiry,
            failed = r.failed,
            orphans_removed = r.orphans_removed,
            rolled_back = r.marker_rolled_back,
            "reconciliation pass completed"
        ),
        SyncOutcome::AlreadySynced => info!("already synced today"),
        SyncOutcome::InFlight => info!("another pass is in flight"),
    }
}

fn describe(details: &RecordDetails) -> String {
    match details {
        RecordDetails::Sale(d) => format!(
            "{} / {} ({} {})",
            d.customer_name, d.service_name, d.amount, d.currency
        ),
        RecordDetails::Service(d) => format!(
            "{} / {} ({} {}, {})",
            d.customer_name, d.service_name, d.amount, d.currency, d.billing_cycle
        ),
    }
}
