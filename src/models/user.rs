//! Observed account records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the connection graph a list describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Accounts the monitored account follows
    Following,
    /// Accounts following the monitored account
    Followers,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Following, Direction::Followers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Following => "following",
            Direction::Followers => "followers",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed account.
///
/// `id` is the platform-assigned key. `username` can change over time and
/// is never used to match records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Stable platform identifier
    pub id: String,

    /// Handle without the leading `@`
    pub username: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Bio text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blue_verified: Option<bool>,

    /// First time this id showed up in the following list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen_following: Option<DateTime<Utc>>,

    /// First time this id showed up in the followers list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen_follower: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Create a bare record with only identity fields set.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: String::new(),
            description: None,
            followers_count: None,
            following_count: None,
            is_blue_verified: None,
            first_seen_following: None,
            first_seen_follower: None,
        }
    }

    pub(crate) fn set_first_seen(&mut self, direction: Direction, at: DateTime<Utc>) {
        match direction {
            Direction::Following => self.first_seen_following = Some(at),
            Direction::Followers => self.first_seen_follower = Some(at),
        }
    }

    /// Format for display, e.g. `@handle (Display Name)`.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("@{}", self.username)
        } else {
            format!("@{} ({})", self.username, self.name)
        }
    }
}

/// A monitored account resolved to its stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
}

impl Account {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
        }
    }
}
