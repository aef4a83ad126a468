//! Reconciles a partial crawl with the previous snapshot.

use std::collections::HashSet;

use crate::models::UserRecord;

/// Merge a freshly fetched list with the previous snapshot's list.
///
/// An exhaustive crawl (`stopped_early == false`) is authoritative and is
/// returned unchanged. Otherwise every previous record whose id was not
/// fetched is appended in its previous order: the fetched pages are assumed
/// to hold every change, the rest is carried forward. Removals beyond the
/// fetched pages go unnoticed in that case.
pub fn merge_with_previous(
    fetched: Vec<UserRecord>,
    previous: &[UserRecord],
    stopped_early: bool,
) -> Vec<UserRecord> {
    if !stopped_early {
        return fetched;
    }

    let fetched_count = fetched.len();
    let mut seen: HashSet<String> = fetched.iter().map(|u| u.id.clone()).collect();
    let mut merged = fetched;
    for user in previous {
        if seen.insert(user.id.clone()) {
            merged.push(user.clone());
        }
    }

    log::debug!(
        "Merged {} fetched with {} carried over from previous snapshot",
        fetched_count,
        merged.len() - fetched_count
    );
    merged
}
