//! Diff calculation between consecutive snapshots.
//!
//! Computes added and removed connections per direction plus newly mutual
//! accounts, which downstream notification code turns into alerts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{Direction, Snapshot, UserRecord};

/// Changes in one direction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiffResult {
    /// In current but not previous (current-side records)
    pub added: Vec<UserRecord>,
    /// In previous but not current (previous-side records)
    pub removed: Vec<UserRecord>,
    /// Present in both with a changed handle or display name (current-side records)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renamed: Vec<UserRecord>,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.renamed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.renamed.len()
    }

    pub fn added_ids(&self) -> Vec<&str> {
        self.added.iter().map(|u| u.id.as_str()).collect()
    }

    pub fn removed_ids(&self) -> Vec<&str> {
        self.removed.iter().map(|u| u.id.as_str()).collect()
    }
}

/// Changes between two snapshots of the same account.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotDiff {
    pub following: DiffResult,
    pub followers: DiffResult,
    /// Mutual now, not mutual before
    pub new_mutuals: Vec<String>,
    /// Mutual before, not mutual now
    pub lost_mutuals: Vec<String>,
    /// False when the current following list was completed from older data
    pub following_removals_reliable: bool,
    /// False when the current followers list was completed from older data
    pub followers_removals_reliable: bool,
}

impl SnapshotDiff {
    pub fn direction(&self, direction: Direction) -> &DiffResult {
        match direction {
            Direction::Following => &self.following,
            Direction::Followers => &self.followers,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.following.has_changes()
            || self.followers.has_changes()
            || !self.new_mutuals.is_empty()
            || !self.lost_mutuals.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.following.change_count()
            + self.followers.change_count()
            + self.new_mutuals.len()
            + self.lost_mutuals.len()
    }
}

/// Calculator for computing diffs between snapshots.
#[derive(Debug, Clone, Default)]
pub struct DiffCalculator {
    /// Whether to report handle/display-name changes for the same id
    detect_profile_changes: bool,
}

impl DiffCalculator {
    /// Create a calculator that reports additions and removals only.
    pub fn new() -> Self {
        Self {
            detect_profile_changes: false,
        }
    }

    /// Create a calculator that also reports renamed accounts.
    pub fn with_profile_changes() -> Self {
        Self {
            detect_profile_changes: true,
        }
    }

    /// Calculate the diff between two lists of one direction.
    pub fn calculate(&self, previous: &[UserRecord], current: &[UserRecord]) -> DiffResult {
        let prev_map: HashMap<&str, &UserRecord> =
            previous.iter().map(|u| (u.id.as_str(), u)).collect();
        let curr_ids: HashSet<&str> = current.iter().map(|u| u.id.as_str()).collect();

        let mut result = DiffResult::default();
        let mut visited: HashSet<&str> = HashSet::new();

        for user in current {
            if !visited.insert(user.id.as_str()) {
                continue;
            }
            match prev_map.get(user.id.as_str()) {
                None => result.added.push(user.clone()),
                Some(prev) if self.detect_profile_changes => {
                    if prev.username != user.username || prev.name != user.name {
                        result.renamed.push(user.clone());
                    }
                }
                Some(_) => {}
            }
        }

        let mut removed_seen: HashSet<&str> = HashSet::new();
        for user in previous {
            if !curr_ids.contains(user.id.as_str()) && removed_seen.insert(user.id.as_str()) {
                result.removed.push(user.clone());
            }
        }

        result
    }

    /// Calculate every change between `previous` and `current`.
    pub fn snapshots(&self, previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
        let following = self.calculate(&previous.following, &current.following);
        let followers = self.calculate(&previous.followers, &current.followers);

        let diff = SnapshotDiff {
            following,
            followers,
            new_mutuals: new_mutuals(previous, current),
            lost_mutuals: new_mutuals(current, previous),
            following_removals_reliable: current.following_status.removals_reliable(),
            followers_removals_reliable: current.followers_status.removals_reliable(),
        };

        if diff.has_changes() {
            log::info!(
                "Diff for {}: following +{}/-{}, followers +{}/-{}, {} new mutual, {} lost mutual",
                current.account_id,
                diff.following.added.len(),
                diff.following.removed.len(),
                diff.followers.added.len(),
                diff.followers.removed.len(),
                diff.new_mutuals.len(),
                diff.lost_mutuals.len()
            );
        } else {
            log::info!("Diff for {}: no changes", current.account_id);
        }
        diff
    }
}

/// Convenience function to diff two lists of one direction.
pub fn diff_users(previous: &[UserRecord], current: &[UserRecord]) -> DiffResult {
    DiffCalculator::new().calculate(previous, current)
}

/// Ids mutual in `current` that were not mutual in `previous`, in `current` order.
pub fn new_mutuals(previous: &Snapshot, current: &Snapshot) -> Vec<String> {
    let before = previous.mutual_ids();
    current
        .mutual
        .iter()
        .filter(|id| !before.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Convenience function to diff two snapshots.
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    DiffCalculator::new().snapshots(previous, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlStatus, SCHEMA_VERSION};
    use crate::pipeline::analyze_connections;
    use crate::testing::users;
    use chrono::Utc;

    fn snapshot(following: &[&str], followers: &[&str]) -> Snapshot {
        let following = users(following);
        let followers = users(followers);
        let sets = analyze_connections(&following, &followers);
        Snapshot {
            schema_version: SCHEMA_VERSION,
            account_id: "100".into(),
            account_handle: "owner".into(),
            captured_at: Utc::now(),
            following,
            followers,
            mutual: sets.mutual,
            following_only: sets.following_only,
            followers_only: sets.followers_only,
            following_status: CrawlStatus::default(),
            followers_status: CrawlStatus::default(),
        }
    }

    #[test]
    fn test_no_changes() {
        let prev = users(&["1", "2"]);
        let result = diff_users(&prev, &prev.clone());
        assert!(!result.has_changes());
        assert_eq!(result.change_count(), 0);
    }

    #[test]
    fn test_added_and_removed() {
        let result = diff_users(&users(&["a", "b"]), &users(&["b", "c"]));
        assert_eq!(result.added_ids(), vec!["c"]);
        assert_eq!(result.removed_ids(), vec!["a"]);
    }

    #[test]
    fn test_removed_uses_previous_record() {
        let mut prev = users(&["a"]);
        prev[0].name = "Old Name".into();
        let result = diff_users(&prev, &[]);
        assert_eq!(result.removed[0].name, "Old Name");
    }

    #[test]
    fn test_renames_only_with_profile_changes() {
        let prev = users(&["a"]);
        let mut curr = users(&["a"]);
        curr[0].username = "a_new".into();

        assert!(!diff_users(&prev, &curr).has_changes());

        let result = DiffCalculator::with_profile_changes().calculate(&prev, &curr);
        assert_eq!(result.renamed.len(), 1);
        assert_eq!(result.renamed[0].username, "a_new");
    }

    #[test]
    fn test_empty_to_full_and_back() {
        let full = users(&["1"]);
        assert_eq!(diff_users(&[], &full).added.len(), 1);
        assert_eq!(diff_users(&full, &[]).removed.len(), 1);
    }

    #[test]
    fn test_new_mutual_reported_once() {
        let prev = snapshot(&["a", "b"], &["b"]);
        let curr = snapshot(&["b", "c"], &["b", "c"]);

        let diff = diff_snapshots(&prev, &curr);
        assert_eq!(diff.following.added_ids(), vec!["c"]);
        assert_eq!(diff.following.removed_ids(), vec!["a"]);
        assert_eq!(diff.new_mutuals, vec!["c".to_string()]);
        assert!(diff.lost_mutuals.is_empty());
    }

    #[test]
    fn test_already_mutual_is_not_new() {
        let prev = snapshot(&["a", "c"], &["c"]);
        let curr = snapshot(&["b", "c"], &["c"]);

        let diff = diff_snapshots(&prev, &curr);
        assert!(diff.new_mutuals.is_empty());
    }

    #[test]
    fn test_lost_mutual() {
        let prev = snapshot(&["a"], &["a"]);
        let curr = snapshot(&["a"], &[]);

        let diff = diff_snapshots(&prev, &curr);
        assert_eq!(diff.lost_mutuals, vec!["a".to_string()]);
        assert_eq!(diff.followers.removed_ids(), vec!["a"]);
    }

    #[test]
    fn test_reliability_follows_current_status() {
        let prev = snapshot(&["a"], &["b"]);
        let mut curr = snapshot(&["a"], &["b"]);
        curr.followers_status.stopped_early = true;

        let diff = diff_snapshots(&prev, &curr);
        assert!(diff.following_removals_reliable);
        assert!(!diff.followers_removals_reliable);
    }
}
