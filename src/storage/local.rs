//! Local filesystem storage implementation.
//!
//! Every write goes through a temp file and a rename, so readers only ever
//! see a complete document. A cycle commit writes the snapshot first and the
//! first-seen index second, removing the snapshot again if the index write
//! fails.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml           # Crawler Configuration
//! └── accounts/
//!     └── {account_id}/
//!         ├── first_seen.json
//!         ├── .lock
//!         └── snapshots/
//!             └── YYYYMMDDTHHMMSSZ.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{SCHEMA_VERSION, Snapshot, StorageConfig};
use crate::pipeline::FirstSeenIndex;
use crate::storage::{CommitMetadata, SnapshotEntry, SnapshotStore, StorageLease};
use crate::utils::{parse_snapshot_stem, snapshot_stem};

const INDEX_FILE: &str = "first_seen.json";
const LOCK_FILE: &str = ".lock";
const SNAPSHOT_DIR: &str = "snapshots";

/// Collision suffixes stay three digits wide so names keep sorting.
const MAX_SAME_SECOND: usize = 999;

/// Lock files older than this are assumed to be left over from a crash.
const STALE_LEASE_HOURS: i64 = 6;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    config: StorageConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(root_dir, StorageConfig::default())
    }

    /// Create a LocalStorage with custom retention settings.
    pub fn with_config(root_dir: impl Into<PathBuf>, config: StorageConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            config,
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Relative key of an account's directory.
    fn account_key(account_id: &str) -> Result<String> {
        let valid = !account_id.is_empty()
            && account_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::validation(format!(
                "invalid account id: {account_id:?}"
            )));
        }
        Ok(format!("accounts/{}", account_id))
    }

    fn index_key(account_id: &str) -> Result<String> {
        Ok(format!("{}/{}", Self::account_key(account_id)?, INDEX_FILE))
    }

    fn snapshot_key(account_id: &str, stem: &str) -> Result<String> {
        Ok(format!(
            "{}/{}/{}.json",
            Self::account_key(account_id)?,
            SNAPSHOT_DIR,
            stem
        ))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data. A file that exists but does not parse is corrupt state.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::corrupt(self.path(key), e)),
            None => Ok(None),
        }
    }

    fn check_version(&self, key: &str, version: u32) -> Result<()> {
        if version > SCHEMA_VERSION {
            return Err(AppError::corrupt(
                self.path(key),
                format!(
                    "schema version {} is newer than supported {}",
                    version, SCHEMA_VERSION
                ),
            ));
        }
        Ok(())
    }

    /// Pick a snapshot stem that does not collide with an existing file.
    ///
    /// Same-second snapshots get a `_NNN` suffix. `_` sorts after `.`, so the
    /// newest file is always last by name.
    async fn free_stem(&self, account_id: &str, snapshot: &Snapshot) -> Result<String> {
        let base = snapshot_stem(snapshot.captured_at);
        let mut stem = base.clone();
        for n in 1..=MAX_SAME_SECOND {
            if !tokio::fs::try_exists(self.path(&Self::snapshot_key(account_id, &stem)?)).await? {
                return Ok(stem);
            }
            stem = format!("{}_{:03}", base, n);
        }
        Err(AppError::validation(format!(
            "more than {} snapshots for {} within {}",
            MAX_SAME_SECOND, account_id, base
        )))
    }

    /// Delete the oldest snapshots beyond `keep_snapshots`.
    async fn prune(&self, account_id: &str) -> Result<usize> {
        if self.config.keep_snapshots == 0 {
            return Ok(0);
        }
        let entries = self.list_snapshots(account_id).await?;
        let excess = entries.len().saturating_sub(self.config.keep_snapshots);
        for entry in entries.iter().take(excess) {
            let key = Self::snapshot_key(account_id, &entry.key)?;
            tokio::fs::remove_file(self.path(&key)).await?;
            log::debug!("Pruned snapshot {}", key);
        }
        if excess > 0 {
            log::info!("Pruned {} old snapshots for {}", excess, account_id);
        }
        Ok(excess)
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn load_latest(&self, account_id: &str) -> Result<Option<Snapshot>> {
        match self.list_snapshots(account_id).await?.last() {
            Some(entry) => Ok(Some(self.load_snapshot(account_id, &entry.key).await?)),
            None => {
                log::info!("No previous snapshot for {}", account_id);
                Ok(None)
            }
        }
    }

    async fn list_snapshots(&self, account_id: &str) -> Result<Vec<SnapshotEntry>> {
        let dir = self.path(&format!("{}/{}", Self::account_key(account_id)?, SNAPSHOT_DIR));
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match parse_snapshot_stem(stem) {
                Some(captured_at) => entries.push(SnapshotEntry {
                    key: stem.to_string(),
                    captured_at,
                }),
                None => log::warn!("Ignoring unexpected file {}", path.display()),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn load_snapshot(&self, account_id: &str, key: &str) -> Result<Snapshot> {
        let key = Self::snapshot_key(account_id, key)?;
        let snapshot: Snapshot = self
            .read_json(&key)
            .await?
            .ok_or_else(|| AppError::validation(format!("snapshot {} not found", key)))?;
        self.check_version(&key, snapshot.schema_version)?;
        Ok(snapshot)
    }

    async fn load_index(&self, account_id: &str) -> Result<FirstSeenIndex> {
        let key = Self::index_key(account_id)?;
        match self.read_json::<FirstSeenIndex>(&key).await? {
            Some(index) => {
                self.check_version(&key, index.schema_version)?;
                Ok(index)
            }
            None => {
                log::info!("No first-seen index for {}, starting empty", account_id);
                Ok(FirstSeenIndex::new())
            }
        }
    }

    async fn commit(&self, snapshot: &Snapshot, index: &FirstSeenIndex) -> Result<CommitMetadata> {
        let account_id = snapshot.account_id.as_str();
        let stem = self.free_stem(account_id, snapshot).await?;
        let snapshot_key = Self::snapshot_key(account_id, &stem)?;
        let index_key = Self::index_key(account_id)?;

        self.write_json(&snapshot_key, snapshot).await?;
        if let Err(e) = self.write_json(&index_key, index).await {
            log::error!(
                "Index write failed for {}, rolling back {}: {}",
                account_id,
                snapshot_key,
                e
            );
            if let Err(cleanup) = tokio::fs::remove_file(self.path(&snapshot_key)).await {
                log::error!("Rollback of {} failed: {}", snapshot_key, cleanup);
            }
            return Err(e);
        }

        log::info!(
            "Snapshot {} written ({} following, {} followers)",
            snapshot_key,
            snapshot.following.len(),
            snapshot.followers.len()
        );

        let pruned = match self.prune(account_id).await {
            Ok(pruned) => pruned,
            Err(e) => {
                log::warn!("Snapshot retention failed for {}: {}", account_id, e);
                0
            }
        };

        Ok(CommitMetadata {
            snapshot_location: self.path(&snapshot_key).display().to_string(),
            pruned,
        })
    }

    async fn find_account(&self, handle: &str) -> Result<Option<String>> {
        let mut reader = match tokio::fs::read_dir(self.path("accounts")).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(item) = reader.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let Some(account_id) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if Self::account_key(&account_id).is_err() {
                continue;
            }
            if let Some(snapshot) = self.load_latest(&account_id).await? {
                if snapshot.account_handle.eq_ignore_ascii_case(handle) {
                    return Ok(Some(account_id));
                }
            }
        }
        Ok(None)
    }

    async fn lease(&self, account_id: &str) -> Result<StorageLease> {
        let path = self.path(&format!("{}/{}", Self::account_key(account_id)?, LOCK_FILE));
        self.ensure_dir(&path).await?;

        let holder = format!("pid={} at={}", std::process::id(), Utc::now().to_rfc3339());
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(holder.as_bytes()).await?;
                    return Ok(StorageLease::file(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let modified = tokio::fs::metadata(&path).await?.modified()?;
                    let age = chrono::DateTime::<Utc>::from(modified);
                    if Utc::now() - age > Duration::hours(STALE_LEASE_HOURS) {
                        log::warn!("Removing stale lock {}", path.display());
                        tokio::fs::remove_file(&path).await?;
                        continue;
                    }
                    return Err(AppError::AccountBusy(account_id.to_string()));
                }
                Err(e) => return Err(AppError::Io(e)),
            }
        }
        Err(AppError::AccountBusy(account_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlStatus, Direction};
    use crate::testing::users;
    use chrono::{DateTime, TimeZone};
    use tempfile::TempDir;

    fn snapshot(at: DateTime<Utc>, following: &[&str]) -> Snapshot {
        let following = users(following);
        Snapshot {
            schema_version: SCHEMA_VERSION,
            account_id: "100".into(),
            account_handle: "Owner".into(),
            captured_at: at,
            mutual: Vec::new(),
            following_only: following.iter().map(|u| u.id.clone()).collect(),
            followers_only: Vec::new(),
            following,
            followers: Vec::new(),
            following_status: CrawlStatus::default(),
            followers_status: CrawlStatus::default(),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.read_bytes("nope.txt").await.unwrap().is_none());
        assert!(storage.load_latest("100").await.unwrap().is_none());
        assert!(storage.load_index("100").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_and_load_latest() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut index = FirstSeenIndex::new();
        index.observe(Direction::Following, "a", at(1));

        storage.commit(&snapshot(at(1), &["a"]), &index).await.unwrap();
        storage.commit(&snapshot(at(2), &["a", "b"]), &index).await.unwrap();

        let latest = storage.load_latest("100").await.unwrap().unwrap();
        assert_eq!(latest.captured_at, at(2));
        assert_eq!(latest.following.len(), 2);

        let loaded_index = storage.load_index("100").await.unwrap();
        assert_eq!(loaded_index, index);
    }

    #[tokio::test]
    async fn test_same_second_snapshots_do_not_overwrite() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let index = FirstSeenIndex::new();

        storage.commit(&snapshot(at(3), &["a"]), &index).await.unwrap();
        storage.commit(&snapshot(at(3), &["b"]), &index).await.unwrap();

        let entries = storage.list_snapshots("100").await.unwrap();
        assert_eq!(entries.len(), 2);
        let latest = storage.load_latest("100").await.unwrap().unwrap();
        assert_eq!(latest.following[0].id, "b");
    }

    #[tokio::test]
    async fn test_newest_snapshot_file_sorts_last() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let index = FirstSeenIndex::new();

        for id in ["a", "b", "c"] {
            storage.commit(&snapshot(at(3), &[id]), &index).await.unwrap();
        }

        let dir = tmp.path().join("accounts/100/snapshots");
        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "20260401T030000Z.json",
                "20260401T030000Z_001.json",
                "20260401T030000Z_002.json",
            ]
        );

        let newest: Snapshot =
            serde_json::from_slice(&std::fs::read(dir.join(names.last().unwrap())).unwrap())
                .unwrap();
        assert_eq!(newest.following[0].id, "c");
        assert_eq!(
            storage.load_latest("100").await.unwrap().unwrap().following[0].id,
            "c"
        );
    }

    #[tokio::test]
    async fn test_corrupt_index_is_surfaced() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage
            .write_bytes("accounts/100/first_seen.json", b"{ not json")
            .await
            .unwrap();

        let err = storage.load_index("100").await.unwrap_err();
        assert!(matches!(err, AppError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let mut index = FirstSeenIndex::new();
        index.schema_version = SCHEMA_VERSION + 1;
        storage
            .write_json("accounts/100/first_seen.json", &index)
            .await
            .unwrap();

        assert!(matches!(
            storage.load_index("100").await,
            Err(AppError::CorruptState { .. })
        ));
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::with_config(tmp.path(), StorageConfig { keep_snapshots: 2 });
        let index = FirstSeenIndex::new();

        for hour in 1..=4 {
            storage
                .commit(&snapshot(at(hour), &["a"]), &index)
                .await
                .unwrap();
        }

        let entries = storage.list_snapshots("100").await.unwrap();
        let times: Vec<_> = entries.iter().map(|e| e.captured_at).collect();
        assert_eq!(times, vec![at(3), at(4)]);
    }

    #[tokio::test]
    async fn test_find_account_by_handle() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage
            .commit(&snapshot(at(1), &["a"]), &FirstSeenIndex::new())
            .await
            .unwrap();

        assert_eq!(
            storage.find_account("owner").await.unwrap(),
            Some("100".to_string())
        );
        assert_eq!(storage.find_account("someone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_and_released() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let lease = storage.lease("100").await.unwrap();
        assert!(matches!(
            storage.lease("100").await,
            Err(AppError::AccountBusy(_))
        ));
        drop(lease);

        let lease = storage.lease("100").await.unwrap();
        lease.release().await.unwrap();
        assert!(!tmp.path().join("accounts/100/.lock").exists());
        assert!(storage.lease("100").await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_path_like_account_ids() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(storage.load_index("../etc").await.is_err());
        assert!(storage.load_latest("").await.is_err());
    }
}
