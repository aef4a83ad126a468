// src/pipeline/crawl.rs

//! Crawl cycle orchestration.
//!
//! One cycle for one account: fetch following, then followers, reconcile
//! each with the previous snapshot, stamp first-seen times, analyze, diff,
//! and commit. Nothing is written unless the whole cycle succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Account, Config, CrawlStatus, Direction, SCHEMA_VERSION, Snapshot, UserRecord};
use crate::pipeline::analyze::analyze_connections;
use crate::pipeline::circuit_breaker::CircuitBreaker;
use crate::pipeline::diff::{DiffCalculator, SnapshotDiff};
use crate::pipeline::index::FirstSeenIndex;
use crate::pipeline::lock::AccountLocks;
use crate::pipeline::merge::merge_with_previous;
use crate::services::{PageSource, PagedFetcher, PlatformClient};
use crate::storage::{CommitMetadata, SnapshotStore};
use crate::utils::normalize_handle;

/// Per-run switches, usually set from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Ignore previously known ids and page through everything
    pub force_full: bool,
    /// Commit even if the circuit breaker objects
    pub force_write: bool,
}

/// Everything a cycle produced, for reporting and notification.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    /// `None` on the first cycle for an account
    pub diff: Option<SnapshotDiff>,
    pub commit: CommitMetadata,
}

impl CycleReport {
    pub fn status(&self, direction: Direction) -> &CrawlStatus {
        self.snapshot.status(direction)
    }
}

/// Runs crawl cycles against a snapshot store.
#[derive(Debug, Clone)]
pub struct CrawlCycle {
    fetcher: PagedFetcher,
    breaker: CircuitBreaker,
    locks: AccountLocks,
    merge_on_error: bool,
    cancel: CancellationToken,
}

impl CrawlCycle {
    pub fn new(config: &Config) -> Self {
        Self {
            fetcher: PagedFetcher::new(&config.crawler),
            breaker: CircuitBreaker::with_config(config.guard.clone()),
            locks: AccountLocks::new(),
            merge_on_error: config.crawler.merge_on_error,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a lock registry with other cycle runners.
    pub fn with_locks(mut self, locks: AccountLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Abort between pages, and before commit, once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.fetcher = self.fetcher.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Run one full cycle for `account`.
    pub async fn run(
        &self,
        account: &Account,
        following_source: &dyn PageSource,
        followers_source: &dyn PageSource,
        storage: &dyn SnapshotStore,
        options: CycleOptions,
    ) -> Result<CycleReport> {
        let _guard = self.locks.acquire(&account.id).await;
        let lease = storage.lease(&account.id).await?;

        let previous = storage.load_latest(&account.id).await?;
        let mut index = storage.load_index(&account.id).await?;

        log::info!(
            "Crawling @{} ({}), previous snapshot: {}, force_full={}",
            account.handle,
            account.id,
            previous
                .as_ref()
                .map(|p| p.captured_at.to_rfc3339())
                .unwrap_or_else(|| "none".into()),
            options.force_full
        );

        let (mut following, following_status) = self
            .crawl_direction(
                account,
                Direction::Following,
                following_source,
                previous.as_ref(),
                &index,
                options,
            )
            .await?;
        let (mut followers, followers_status) = self
            .crawl_direction(
                account,
                Direction::Followers,
                followers_source,
                previous.as_ref(),
                &index,
                options,
            )
            .await?;

        let now = Utc::now();
        index.stamp(Direction::Following, &mut following, now);
        index.stamp(Direction::Followers, &mut followers, now);

        let snapshot = assemble_snapshot(
            account,
            now,
            following,
            followers,
            following_status,
            followers_status,
        );
        snapshot.check_invariants()?;

        if let Some(previous) = previous.as_ref() {
            if options.force_write {
                log::warn!("Circuit breaker bypassed for {}", account.id);
            } else {
                // A list that reached the end of the listing is authoritative.
                for direction in Direction::ALL {
                    if !snapshot.status(direction).incomplete {
                        continue;
                    }
                    self.breaker.validate(
                        direction,
                        snapshot.users(direction),
                        previous.users(direction),
                    )?;
                }
            }
        }

        let diff = previous
            .as_ref()
            .map(|previous| DiffCalculator::with_profile_changes().snapshots(previous, &snapshot));

        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let commit = storage.commit(&snapshot, &index).await?;
        if let Err(e) = lease.release().await {
            log::warn!("Failed to release lock for {}: {}", account.id, e);
        }
        Ok(CycleReport {
            snapshot,
            diff,
            commit,
        })
    }

    async fn crawl_direction(
        &self,
        account: &Account,
        direction: Direction,
        source: &dyn PageSource,
        previous: Option<&Snapshot>,
        index: &FirstSeenIndex,
        options: CycleOptions,
    ) -> Result<(Vec<UserRecord>, CrawlStatus)> {
        // Early stop is only safe when there is a previous list to fill in from.
        let known: Option<HashSet<String>> = match previous {
            Some(_) if !options.force_full && index.len(direction) > 0 => {
                Some(index.known_ids(direction))
            }
            _ => None,
        };

        let result = self
            .fetcher
            .run(direction, &account.id, source, known.as_ref())
            .await;
        if result.cancelled {
            return Err(AppError::Cancelled);
        }

        let previous_users = previous.map(|p| p.users(direction)).unwrap_or(&[]);
        let merge = previous.is_some() && result.needs_merge(self.merge_on_error);
        let status = result.status(merge);
        if result.incomplete {
            log::warn!(
                "{} list for {} is incomplete ({}); {}",
                direction,
                account.id,
                result.error.as_deref().unwrap_or("unknown error"),
                if merge {
                    "completing from previous snapshot"
                } else {
                    "keeping partial list"
                }
            );
        }

        let fetched = result.users.len();
        let users = merge_with_previous(result.users, previous_users, merge);
        if merge {
            log::info!(
                "Merged {} {}: {} fetched + {} carried over; removals unreliable",
                account.id,
                direction,
                fetched,
                users.len() - fetched
            );
        }
        Ok((users, status))
    }
}

/// Build a snapshot from stamped lists, deriving the connection sets.
pub fn assemble_snapshot(
    account: &Account,
    captured_at: chrono::DateTime<Utc>,
    following: Vec<UserRecord>,
    followers: Vec<UserRecord>,
    following_status: CrawlStatus,
    followers_status: CrawlStatus,
) -> Snapshot {
    let sets = analyze_connections(&following, &followers);
    Snapshot {
        schema_version: SCHEMA_VERSION,
        account_id: account.id.clone(),
        account_handle: account.handle.clone(),
        captured_at,
        following,
        followers,
        mutual: sets.mutual,
        following_only: sets.following_only,
        followers_only: sets.followers_only,
        following_status,
        followers_status,
    }
}

/// Resolve each handle and run a cycle for it, several accounts at a time.
///
/// Returns one outcome per handle, in completion order. A fatal error such
/// as missing credentials skips every account not started yet.
pub async fn run_crawler(
    config: &Config,
    storage: Arc<dyn SnapshotStore>,
    client: &PlatformClient,
    handles: &[String],
    options: CycleOptions,
    cancel: CancellationToken,
) -> Vec<(String, Result<CycleReport>)> {
    let cycle = CrawlCycle::new(config).with_cancellation(cancel);
    let (cycle, storage) = (&cycle, storage.as_ref());

    run_accounts(handles, config.crawler.max_concurrent, |handle| {
        run_account(cycle, storage, client, handle, options)
    })
    .await
}

async fn run_account(
    cycle: &CrawlCycle,
    storage: &dyn SnapshotStore,
    client: &PlatformClient,
    handle: String,
    options: CycleOptions,
) -> Result<CycleReport> {
    let handle = normalize_handle(&handle)?;
    let account = client.resolve_account(&handle).await?;
    let following = client.pages(Direction::Following);
    let followers = client.pages(Direction::Followers);
    cycle
        .run(&account, &following, &followers, storage, options)
        .await
}

/// Drive `run` over `handles` with bounded concurrency.
async fn run_accounts<F, Fut>(
    handles: &[String],
    concurrency: usize,
    run: F,
) -> Vec<(String, Result<CycleReport>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<CycleReport>>,
{
    let halt = CancellationToken::new();
    let (halt, run) = (&halt, &run);

    stream::iter(handles.iter().cloned())
        .map(move |handle| async move {
            if halt.is_cancelled() {
                log::warn!("Skipping @{} after a fatal error", handle);
                let skipped = AppError::Skipped(handle.clone());
                return (handle, Err(skipped));
            }
            let outcome = run(handle.clone()).await;
            if let Err(e) = &outcome {
                if e.is_fatal() {
                    log::error!("Fatal error for @{}, stopping: {}", handle, e);
                    halt.cancel();
                }
            }
            (handle, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuardConfig;
    use crate::storage::LocalStorage;
    use crate::testing::{ScriptedSource, ids};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config() -> Config {
        let mut config = Config::default();
        config.crawler.request_delay_ms = 0;
        config
    }

    fn account() -> Account {
        Account::new("100", "owner")
    }

    fn id_set(users: &[UserRecord]) -> HashSet<&str> {
        users.iter().map(|u| u.id.as_str()).collect()
    }

    async fn run(
        cycle: &CrawlCycle,
        storage: &LocalStorage,
        following: ScriptedSource,
        followers: ScriptedSource,
        options: CycleOptions,
    ) -> Result<CycleReport> {
        cycle
            .run(&account(), &following, &followers, storage, options)
            .await
    }

    #[tokio::test]
    async fn test_first_cycle_has_no_diff() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        let report = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a", "b"], &["c"]]),
            ScriptedSource::pages(&[&["b", "d"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        assert!(report.diff.is_none());
        assert_eq!(ids(&report.snapshot.following), vec!["a", "b", "c"]);
        assert_eq!(report.snapshot.mutual, vec!["b".to_string()]);
        assert!(report.snapshot.following[0].first_seen_following.is_some());
        assert!(report.snapshot.followers[1].first_seen_follower.is_some());
        assert_eq!(storage.list_snapshots("100").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_crawl_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());
        let full = CycleOptions {
            force_full: true,
            ..CycleOptions::default()
        };

        let pages: &[&[&str]] = &[&["a", "b"], &["c", "d"]];
        let fans: &[&[&str]] = &[&["c", "e"], &["a"]];

        let first = run(&cycle, &storage, ScriptedSource::pages(pages), ScriptedSource::pages(fans), full)
            .await
            .unwrap();
        let second = run(&cycle, &storage, ScriptedSource::pages(pages), ScriptedSource::pages(fans), full)
            .await
            .unwrap();

        let (a, b) = (&first.snapshot, &second.snapshot);
        assert_eq!(id_set(&a.following), id_set(&b.following));
        assert_eq!(id_set(&a.followers), id_set(&b.followers));
        assert_eq!(a.mutual_ids(), b.mutual_ids());
        assert_eq!(
            a.following_only.iter().collect::<HashSet<_>>(),
            b.following_only.iter().collect::<HashSet<_>>()
        );
        assert_eq!(
            a.followers_only.iter().collect::<HashSet<_>>(),
            b.followers_only.iter().collect::<HashSet<_>>()
        );
        assert!(!second.diff.unwrap().has_changes());
    }

    #[tokio::test]
    async fn test_early_stop_merges_with_previous() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"], &["b"], &["c"], &["d"], &["e"]]),
            ScriptedSource::pages(&[&["f"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let following = ScriptedSource::pages(&[&["x"], &["a"], &["b"], &["c"], &["d"], &["e"]]);
        let report = cycle
            .run(
                &account(),
                &following,
                &ScriptedSource::pages(&[&["f"]]),
                &storage,
                CycleOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(following.request_count(), 4);
        assert_eq!(ids(&report.snapshot.following), vec!["x", "a", "b", "c", "d", "e"]);

        let status = report.status(Direction::Following);
        assert!(status.stopped_early);
        assert!(status.merged);

        let diff = report.diff.unwrap();
        assert_eq!(diff.following.added_ids(), vec!["x"]);
        assert!(diff.following.removed.is_empty());
        assert!(!diff.following_removals_reliable);
        assert!(diff.followers_removals_reliable);
    }

    #[tokio::test]
    async fn test_first_seen_survives_cycles() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        let first = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&[]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();
        let stamped = first.snapshot.following[0].first_seen_following;

        let second = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["b", "a"]]),
            ScriptedSource::pages(&[&[]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let a = second.snapshot.find_user("a").unwrap();
        assert_eq!(a.first_seen_following, stamped);
        let index = storage.load_index("100").await.unwrap();
        assert_eq!(index.first_seen(Direction::Following, "a"), stamped);
        assert!(index.first_seen(Direction::Following, "b").unwrap() >= stamped.unwrap());
    }

    #[tokio::test]
    async fn test_new_mutual_detected() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a", "b"]]),
            ScriptedSource::pages(&[&["b"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();
        let report = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["b", "c"]]),
            ScriptedSource::pages(&[&["b", "c"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let diff = report.diff.unwrap();
        assert_eq!(diff.following.added_ids(), vec!["c"]);
        assert_eq!(diff.following.removed_ids(), vec!["a"]);
        assert_eq!(diff.new_mutuals, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_incomplete_not_early() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&["p"], &["q"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();
        let report = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::new().page(&["r"]).failure("503"),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let status = report.status(Direction::Followers);
        assert!(status.incomplete);
        assert!(!status.stopped_early);
        assert!(!status.merged);
        assert_eq!(status.error.as_deref(), Some("503"));
        assert_eq!(ids(&report.snapshot.followers), vec!["r"]);

        let diff = report.diff.unwrap();
        assert_eq!(diff.followers.added_ids(), vec!["r"]);
        assert_eq!(diff.followers.removed_ids(), vec!["p", "q"]);
        assert!(!diff.followers_removals_reliable);
        assert!(diff.following_removals_reliable);
    }

    #[tokio::test]
    async fn test_merge_on_error_completes_failed_direction() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut config = config();
        config.crawler.merge_on_error = true;
        let cycle = CrawlCycle::new(&config);

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&["p"], &["q"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();
        let report = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::new().page(&["r"]).failure("503"),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let status = report.status(Direction::Followers);
        assert!(status.incomplete);
        assert!(!status.stopped_early);
        assert!(status.merged);
        assert_eq!(ids(&report.snapshot.followers), vec!["r", "p", "q"]);

        let diff = report.diff.unwrap();
        assert!(diff.followers.removed.is_empty());
        assert!(!diff.followers_removals_reliable);
    }

    #[tokio::test]
    async fn test_exhaustive_unfollows_are_committed() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());
        let full = CycleOptions {
            force_full: true,
            ..CycleOptions::default()
        };

        let ten: &[&[&str]] = &[&["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]];
        let seven: &[&[&str]] = &[&["0", "1", "2", "3", "4", "5", "6"]];

        run(&cycle, &storage, ScriptedSource::pages(ten), ScriptedSource::pages(&[&[]]), full)
            .await
            .unwrap();
        let report = run(&cycle, &storage, ScriptedSource::pages(seven), ScriptedSource::pages(&[&[]]), full)
            .await
            .unwrap();

        let diff = report.diff.unwrap();
        assert_eq!(diff.following.removed_ids(), vec!["7", "8", "9"]);
        assert!(diff.following_removals_reliable);

        run(&cycle, &storage, ScriptedSource::pages(seven), ScriptedSource::pages(&[&[]]), full)
            .await
            .unwrap();
        assert_eq!(storage.list_snapshots("100").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_circuit_breaker_blocks_partial_commit() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut config = config();
        config.guard = GuardConfig {
            min_baseline: 3,
            ..GuardConfig::default()
        };
        let cycle = CrawlCycle::new(&config);

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a", "b", "c", "d", "e"]]),
            ScriptedSource::pages(&[&[]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        let err = run(
            &cycle,
            &storage,
            ScriptedSource::new().page(&["a"]).failure("503"),
            ScriptedSource::pages(&[&[]]),
            CycleOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::CircuitBreakerTriggered { .. }));
        assert_eq!(storage.list_snapshots("100").await.unwrap().len(), 1);

        let forced = run(
            &cycle,
            &storage,
            ScriptedSource::new().page(&["a"]).failure("503"),
            ScriptedSource::pages(&[&[]]),
            CycleOptions {
                force_write: true,
                ..CycleOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(forced.diff.unwrap().following.removed.len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cycle = CrawlCycle::new(&config()).with_cancellation(cancel);

        let err = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&["b"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(storage.list_snapshots("100").await.unwrap().is_empty());
        assert!(storage.load_index("100").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_index_aborts_cycle() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("accounts/100")).unwrap();
        std::fs::write(tmp.path().join("accounts/100/first_seen.json"), "not json").unwrap();
        let cycle = CrawlCycle::new(&config());

        let err = run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&["b"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::CorruptState { .. }));
        assert!(storage.list_snapshots("100").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_file_released_after_commit() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let cycle = CrawlCycle::new(&config());

        run(
            &cycle,
            &storage,
            ScriptedSource::pages(&[&["a"]]),
            ScriptedSource::pages(&[&["b"]]),
            CycleOptions::default(),
        )
        .await
        .unwrap();

        assert!(!tmp.path().join("accounts/100/.lock").exists());
    }

    #[tokio::test]
    async fn test_fatal_error_skips_remaining_accounts() {
        let calls = AtomicUsize::new(0);
        let handles: Vec<String> = ["ghost", "nokey", "later"].iter().map(|h| h.to_string()).collect();

        let outcomes = run_accounts(&handles, 1, |handle| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = match handle.as_str() {
                    "ghost" => AppError::UserNotFound(handle.clone()),
                    _ => AppError::MissingCredentials("GRAPH_API_TOKEN".into()),
                };
                Err::<CycleReport, _>(err)
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].1, Err(AppError::UserNotFound(_))));
        assert!(matches!(outcomes[1].1, Err(AppError::MissingCredentials(_))));
        assert_eq!(outcomes[2].0, "later");
        assert!(matches!(outcomes[2].1, Err(AppError::Skipped(_))));
    }
}
