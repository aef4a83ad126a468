//! Utility functions and helpers.

pub mod http;

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{AppError, Result};

/// Timestamp layout used in snapshot file names; sorts chronologically.
const SNAPSHOT_STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn handle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid handle regex"))
}

/// Normalize a user-supplied handle: trim, strip a leading `@`, validate.
pub fn normalize_handle(input: &str) -> Result<String> {
    let handle = input.trim().trim_start_matches('@');
    if handle_pattern().is_match(handle) {
        Ok(handle.to_string())
    } else {
        Err(AppError::validation(format!("invalid handle: {input:?}")))
    }
}

/// Whether the argument looks like a platform account id rather than a handle.
pub fn is_account_id(input: &str) -> bool {
    !input.is_empty() && input.chars().all(|c| c.is_ascii_digit())
}

/// Sortable file stem for a snapshot captured at `at`.
pub fn snapshot_stem(at: DateTime<Utc>) -> String {
    at.format(SNAPSHOT_STAMP_FORMAT).to_string()
}

/// Parse the capture time back out of a snapshot file stem.
///
/// Accepts the `_NNN` collision suffix added when two snapshots share a second.
pub fn parse_snapshot_stem(stem: &str) -> Option<DateTime<Utc>> {
    let stamp = stem.split('_').next()?;
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
