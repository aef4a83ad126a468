//! Mutual / one-sided connection analysis.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::UserRecord;

/// Identifier sets derived from the two directional lists.
///
/// Each list keeps the order of the input it was drawn from; compare as sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSets {
    pub mutual: Vec<String>,
    pub following_only: Vec<String>,
    pub followers_only: Vec<String>,
}

/// Split `following` and `followers` into mutual and one-sided ids.
pub fn analyze_connections(following: &[UserRecord], followers: &[UserRecord]) -> ConnectionSets {
    let following_ids: HashSet<&str> = following.iter().map(|u| u.id.as_str()).collect();
    let follower_ids: HashSet<&str> = followers.iter().map(|u| u.id.as_str()).collect();

    let mut sets = ConnectionSets::default();
    let mut emitted: HashSet<&str> = HashSet::new();

    for user in following {
        if !emitted.insert(user.id.as_str()) {
            continue;
        }
        if follower_ids.contains(user.id.as_str()) {
            sets.mutual.push(user.id.clone());
        } else {
            sets.following_only.push(user.id.clone());
        }
    }

    for user in followers {
        if !following_ids.contains(user.id.as_str()) && emitted.insert(user.id.as_str()) {
            sets.followers_only.push(user.id.clone());
        }
    }

    sets
}
