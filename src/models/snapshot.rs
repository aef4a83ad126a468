//! Point-in-time observation of an account's connection graph.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Direction, UserRecord};

/// Current on-disk schema version for snapshots and first-seen indexes.
pub const SCHEMA_VERSION: u32 = 1;

/// How a single direction's crawl ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlStatus {
    /// Pagination halted by the early-stop heuristic
    pub stopped_early: bool,
    /// Pagination halted by a fetch failure or cancellation
    pub incomplete: bool,
    /// The list was completed from the previous snapshot
    pub merged: bool,
    /// Number of pages requested
    pub pages_fetched: usize,
    /// Upstream error that ended the crawl, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlStatus {
    /// Whether an id missing from this direction really means it was removed.
    pub fn removals_reliable(&self) -> bool {
        !self.stopped_early && !self.incomplete
    }
}

/// One observation of an account's following/followers graph.
///
/// Created wholesale by one crawl cycle and never modified after it is
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub account_id: String,
    pub account_handle: String,
    pub captured_at: DateTime<Utc>,
    pub following: Vec<UserRecord>,
    pub followers: Vec<UserRecord>,
    pub mutual: Vec<String>,
    pub following_only: Vec<String>,
    pub followers_only: Vec<String>,
    #[serde(default)]
    pub following_status: CrawlStatus,
    #[serde(default)]
    pub followers_status: CrawlStatus,
}

impl Snapshot {
    /// Records for one direction.
    pub fn users(&self, direction: Direction) -> &[UserRecord] {
        match direction {
            Direction::Following => &self.following,
            Direction::Followers => &self.followers,
        }
    }

    /// Crawl status for one direction.
    pub fn status(&self, direction: Direction) -> &CrawlStatus {
        match direction {
            Direction::Following => &self.following_status,
            Direction::Followers => &self.followers_status,
        }
    }

    /// Identifier set for one direction.
    pub fn ids(&self, direction: Direction) -> HashSet<&str> {
        self.users(direction).iter().map(|u| u.id.as_str()).collect()
    }

    /// Identifier set of mutual connections.
    pub fn mutual_ids(&self) -> HashSet<&str> {
        self.mutual.iter().map(String::as_str).collect()
    }

    /// Verify the derived identifier lists against the two user lists.
    pub fn check_invariants(&self) -> Result<()> {
        let following = self.ids(Direction::Following);
        let followers = self.ids(Direction::Followers);
        let mutual = self.mutual_ids();
        let following_only: HashSet<&str> =
            self.following_only.iter().map(String::as_str).collect();
        let followers_only: HashSet<&str> =
            self.followers_only.iter().map(String::as_str).collect();

        let fail = |what: &str| {
            Err(AppError::validation(format!(
                "snapshot for {} violates {}",
                self.account_id, what
            )))
        };

        if following.len() != self.following.len() || followers.len() != self.followers.len() {
            return fail("unique ids per direction");
        }
        if !mutual.is_disjoint(&following_only) || !mutual.is_disjoint(&followers_only) {
            return fail("mutual disjointness");
        }
        if !following_only.is_disjoint(&followers_only) {
            return fail("following-only/followers-only disjointness");
        }
        let following_union: HashSet<&str> = mutual.union(&following_only).copied().collect();
        if following_union != following {
            return fail("mutual ∪ following_only == following");
        }
        let followers_union: HashSet<&str> = mutual.union(&followers_only).copied().collect();
        if followers_union != followers {
            return fail("mutual ∪ followers_only == followers");
        }
        Ok(())
    }

    /// Find a record by id in either direction.
    pub fn find_user(&self, id: &str) -> Option<&UserRecord> {
        self.following
            .iter()
            .chain(self.followers.iter())
            .find(|u| u.id == id)
    }
}
