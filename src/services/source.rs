//! The page-fetch capability consumed by the fetcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::UserRecord;

/// One page of a directional listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResponse {
    pub success: bool,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl PageResponse {
    /// A successful page.
    pub fn ok(users: Vec<UserRecord>, next_cursor: Option<String>) -> Self {
        Self {
            success: true,
            users,
            error: None,
            next_cursor,
        }
    }

    /// A failed page carrying the upstream message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            users: Vec::new(),
            error: Some(message.into()),
            next_cursor: None,
        }
    }

    /// The cursor for the next request, if the listing continues.
    pub fn continuation(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .filter(|cursor| !is_terminal_cursor(cursor))
    }
}

/// Whether a cursor marks the end of the listing.
///
/// The platform signals the last page with an empty cursor, `"0"`, or a
/// cursor of the form `0|<opaque>`.
pub fn is_terminal_cursor(cursor: &str) -> bool {
    let cursor = cursor.trim();
    cursor.is_empty() || cursor == "0" || cursor.starts_with("0|")
}

/// Directional listing of an account's connections.
///
/// One implementation is bound to "following", another to "followers".
/// Implementations may return `Err` for transport problems; the fetcher
/// treats that exactly like an unsuccessful [`PageResponse`].
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        user_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<PageResponse>;
}
