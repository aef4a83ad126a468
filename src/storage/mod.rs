//! Storage abstractions for snapshot persistence.
//!
//! Each monitored account owns a directory with its immutable, timestamped
//! snapshots and its single mutable first-seen index.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! └── accounts/
//!     └── {account_id}/
//!         ├── first_seen.json         # FirstSeenIndex
//!         ├── .lock                   # held while a cycle runs
//!         └── snapshots/
//!             ├── 20260101T120000Z.json
//!             └── 20260102T120000Z.json
//! ```

pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Snapshot;
use crate::pipeline::FirstSeenIndex;

// Re-export for convenience
pub use local::LocalStorage;

/// Metadata about a committed crawl cycle.
#[derive(Debug, Clone)]
pub struct CommitMetadata {
    /// Where the snapshot was written
    pub snapshot_location: String,
    /// Old snapshots removed by retention
    pub pruned: usize,
}

/// A stored snapshot, as listed by [`SnapshotStore::list_snapshots`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Storage key (file stem), sortable by capture time
    pub key: String,
    pub captured_at: DateTime<Utc>,
}

/// Exclusive hold on an account's storage for the duration of a cycle.
///
/// Call [`StorageLease::release`] when done; dropping it releases too.
#[derive(Debug, Default)]
pub struct StorageLease {
    path: Option<PathBuf>,
}

impl StorageLease {
    /// A lease with nothing to release.
    pub fn none() -> Self {
        Self { path: None }
    }

    pub(crate) fn file(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Give the hold back.
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

impl Drop for StorageLease {
    // Blocking removal of a tiny file; only reached when a cycle bails out
    // before `release`.
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to release lock {}: {}", path.display(), e);
            }
        }
    }
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent snapshot for the account, if any.
    async fn load_latest(&self, account_id: &str) -> Result<Option<Snapshot>>;

    /// All stored snapshots for the account, oldest first.
    async fn list_snapshots(&self, account_id: &str) -> Result<Vec<SnapshotEntry>>;

    /// Load one stored snapshot by key.
    async fn load_snapshot(&self, account_id: &str, key: &str) -> Result<Snapshot>;

    /// The account's first-seen index; empty when none was stored yet.
    async fn load_index(&self, account_id: &str) -> Result<FirstSeenIndex>;

    /// Persist a finished cycle: the new snapshot and the updated index.
    ///
    /// Either both are written or neither is.
    async fn commit(&self, snapshot: &Snapshot, index: &FirstSeenIndex) -> Result<CommitMetadata>;

    /// Look up a stored account id by handle (case-insensitive).
    async fn find_account(&self, handle: &str) -> Result<Option<String>>;

    /// Take exclusive hold of the account across processes.
    async fn lease(&self, _account_id: &str) -> Result<StorageLease> {
        Ok(StorageLease::none())
    }
}
