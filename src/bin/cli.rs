//! Graph Crawler CLI
//!
//! Local execution entry point: crawl accounts, inspect stored snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use graph_crawler::{
    error::{AppError, Result},
    models::{Config, Direction, Snapshot},
    pipeline::{self, CycleOptions, CycleReport, SnapshotDiff},
    services::{PlatformClient, token_from_env},
    storage::{LocalStorage, SnapshotStore},
    utils::{is_account_id, normalize_handle},
};
use tokio_util::sync::CancellationToken;

/// Graph Crawler - follower snapshot tracker
#[derive(Parser, Debug)]
#[command(
    name = "graph-crawler",
    version,
    about = "Tracks following/follower changes of monitored accounts"
)]
struct Cli {
    /// Path to storage directory containing config and snapshots
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a crawl cycle for each account
    Crawl {
        /// Account handles, with or without `@`
        #[arg(required = true)]
        handles: Vec<String>,

        /// Page through everything, ignoring known ids
        #[arg(long)]
        force_full: bool,

        /// Commit even if the circuit breaker objects
        #[arg(long)]
        force_write: bool,
    },

    /// List stored snapshots of an account
    History {
        /// Handle or account id
        account: String,
    },

    /// Summarize the latest snapshot of an account
    Show {
        /// Handle or account id
        account: String,
    },

    /// Diff the two most recent snapshots of an account
    Diff {
        /// Handle or account id
        account: String,
    },

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Map a handle or id argument to a stored account id.
async fn stored_account(storage: &LocalStorage, arg: &str) -> Result<String> {
    if is_account_id(arg) {
        return Ok(arg.to_string());
    }
    let handle = normalize_handle(arg)?;
    storage
        .find_account(&handle)
        .await?
        .ok_or(AppError::UserNotFound(handle))
}

fn log_diff(diff: &SnapshotDiff, current: &Snapshot, previous: Option<&Snapshot>) {
    let label = |id: &str| {
        current
            .find_user(id)
            .or_else(|| previous.and_then(|p| p.find_user(id)))
            .map(|u| u.label())
            .unwrap_or_else(|| id.to_string())
    };

    for direction in Direction::ALL {
        let changes = diff.direction(direction);
        for user in &changes.added {
            log::info!("  + {} {}", direction, user.label());
        }
        for user in &changes.removed {
            log::info!("  - {} {}", direction, user.label());
        }
        for user in &changes.renamed {
            log::info!("  ~ {} {} renamed", direction, user.label());
        }
    }
    for id in &diff.new_mutuals {
        log::info!("  ★ new mutual {}", label(id));
    }
    for id in &diff.lost_mutuals {
        log::info!("  ✗ no longer mutual {}", label(id));
    }
    if !diff.following_removals_reliable {
        log::warn!("  following list was not fully crawled; unfollows may be missing");
    }
    if !diff.followers_removals_reliable {
        log::warn!("  followers list was not fully crawled; lost followers may be missing");
    }
}

fn log_report(report: &CycleReport) {
    let snapshot = &report.snapshot;
    log::info!(
        "@{}: {} following, {} followers, {} mutual -> {}",
        snapshot.account_handle,
        snapshot.following.len(),
        snapshot.followers.len(),
        snapshot.mutual.len(),
        report.commit.snapshot_location
    );
    for direction in Direction::ALL {
        let status = report.status(direction);
        if status.incomplete {
            log::warn!(
                "  {} crawl incomplete after {} pages: {}",
                direction,
                status.pages_fetched,
                status.error.as_deref().unwrap_or("cancelled")
            );
        } else if status.stopped_early {
            log::info!(
                "  {} crawl stopped early after {} pages",
                direction,
                status.pages_fetched
            );
        }
    }
    if report.commit.pruned > 0 {
        log::info!("  pruned {} old snapshots", report.commit.pruned);
    }
    match &report.diff {
        Some(diff) if diff.has_changes() => log_diff(diff, snapshot, None),
        Some(_) => log::info!("  no changes"),
        None => log::info!("  first snapshot, nothing to compare"),
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let config = Config::load_or_default(&config_path);
    log::debug!("Loaded configuration from {}", config_path.display());

    let storage = LocalStorage::with_config(&cli.storage_dir, config.storage.clone());

    match cli.command {
        Command::Crawl {
            handles,
            force_full,
            force_write,
        } => {
            config.validate()?;
            let token = token_from_env(&config.api)?;
            let client = PlatformClient::new(&config, token)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, stopping after the current page...");
                    on_signal.cancel();
                }
            });

            let options = CycleOptions {
                force_full,
                force_write,
            };
            let outcomes = pipeline::run_crawler(
                &config,
                Arc::new(storage),
                &client,
                &handles,
                options,
                cancel,
            )
            .await;

            let mut failures = 0;
            for (handle, outcome) in &outcomes {
                match outcome {
                    Ok(report) => log_report(report),
                    Err(e) => {
                        failures += 1;
                        log::error!("@{}: {}", handle.trim_start_matches('@'), e);
                    }
                }
            }

            if failures > 0 {
                return Err(AppError::validation(format!(
                    "{} of {} accounts failed",
                    failures,
                    outcomes.len()
                )));
            }
            log::info!("Crawl complete!");
        }

        Command::History { account } => {
            let account_id = stored_account(&storage, &account).await?;
            let entries = storage.list_snapshots(&account_id).await?;
            if entries.is_empty() {
                log::info!("No snapshots for {}", account_id);
            }
            for entry in entries {
                let snapshot = storage.load_snapshot(&account_id, &entry.key).await?;
                log::info!(
                    "{}  following={} followers={} mutual={}{}",
                    entry.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    snapshot.following.len(),
                    snapshot.followers.len(),
                    snapshot.mutual.len(),
                    if Direction::ALL
                        .iter()
                        .all(|d| snapshot.status(*d).removals_reliable())
                    {
                        ""
                    } else {
                        "  (partial)"
                    }
                );
            }
        }

        Command::Show { account } => {
            let account_id = stored_account(&storage, &account).await?;
            let Some(snapshot) = storage.load_latest(&account_id).await? else {
                log::info!("No snapshot found yet.");
                return Ok(());
            };
            log::info!("Account: @{} ({})", snapshot.account_handle, snapshot.account_id);
            log::info!("Captured: {}", snapshot.captured_at.to_rfc3339());
            log::info!("Following: {}", snapshot.following.len());
            log::info!("Followers: {}", snapshot.followers.len());
            log::info!("Mutual: {}", snapshot.mutual.len());
            log::info!("Following only: {}", snapshot.following_only.len());
            log::info!("Followers only: {}", snapshot.followers_only.len());
        }

        Command::Diff { account } => {
            let account_id = stored_account(&storage, &account).await?;
            let entries = storage.list_snapshots(&account_id).await?;
            let [.., previous, current] = entries.as_slice() else {
                log::info!("Need at least two snapshots to diff.");
                return Ok(());
            };
            let previous = storage.load_snapshot(&account_id, &previous.key).await?;
            let current = storage.load_snapshot(&account_id, &current.key).await?;
            let diff = pipeline::DiffCalculator::with_profile_changes().snapshots(&previous, &current);
            if diff.has_changes() {
                log_diff(&diff, &current, Some(&previous));
            } else {
                log::info!("No changes between {} and {}", previous.captured_at, current.captured_at);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }
    }

    Ok(())
}
