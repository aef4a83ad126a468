//! First-seen index.
//!
//! Remembers, per direction, the first time each id was observed. Entries
//! are write-once: a later observation never moves the timestamp, even when
//! the id drops out of a snapshot and comes back.
//!
//! > Example: `{"following": {"12": "2026-01-03T10:00:00Z"}, "followers": {}}`

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Direction, SCHEMA_VERSION, UserRecord};

/// Persistent id → first-observed timestamp mapping for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirstSeenIndex {
    /// Version for schema evolution
    pub schema_version: u32,
    /// Ids first seen in the following list
    #[serde(default)]
    pub following: BTreeMap<String, DateTime<Utc>>,
    /// Ids first seen in the followers list
    #[serde(default)]
    pub followers: BTreeMap<String, DateTime<Utc>>,
}

impl FirstSeenIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            following: BTreeMap::new(),
            followers: BTreeMap::new(),
        }
    }

    fn entries(&self, direction: Direction) -> &BTreeMap<String, DateTime<Utc>> {
        match direction {
            Direction::Following => &self.following,
            Direction::Followers => &self.followers,
        }
    }

    fn entries_mut(&mut self, direction: Direction) -> &mut BTreeMap<String, DateTime<Utc>> {
        match direction {
            Direction::Following => &mut self.following,
            Direction::Followers => &mut self.followers,
        }
    }

    /// First-seen time for an id, if it has ever been observed.
    pub fn first_seen(&self, direction: Direction, id: &str) -> Option<DateTime<Utc>> {
        self.entries(direction).get(id).copied()
    }

    /// Every id ever observed in `direction`.
    pub fn known_ids(&self, direction: Direction) -> HashSet<String> {
        self.entries(direction).keys().cloned().collect()
    }

    /// Number of ids tracked for a direction.
    pub fn len(&self, direction: Direction) -> usize {
        self.entries(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.following.is_empty() && self.followers.is_empty()
    }

    /// Record `id` as seen at `now` unless it is already known; returns the stored time.
    pub fn observe(&mut self, direction: Direction, id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        *self
            .entries_mut(direction)
            .entry(id.to_string())
            .or_insert(now)
    }

    /// Stamp every record with its first-seen time, adding unseen ids at `now`.
    ///
    /// Returns how many ids were new to the index.
    pub fn stamp(
        &mut self,
        direction: Direction,
        records: &mut [UserRecord],
        now: DateTime<Utc>,
    ) -> usize {
        let before = self.len(direction);
        for record in records.iter_mut() {
            let first_seen = self.observe(direction, &record.id, now);
            record.set_first_seen(direction, first_seen);
        }
        let added = self.len(direction) - before;
        log::debug!(
            "First-seen index: {} new {} ids ({} tracked)",
            added,
            direction,
            self.len(direction)
        );
        added
    }
}

impl Default for FirstSeenIndex {
    fn default() -> Self {
        Self::new()
    }
}
