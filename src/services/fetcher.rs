// src/services/fetcher.rs

//! Paginated connection fetcher.
//!
//! Walks a directional listing page by page, deduplicating ids within the
//! run. When the caller supplies the ids already known from the previous
//! snapshot, the fetcher stops as soon as several consecutive pages bring
//! nothing new.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::{CrawlStatus, CrawlerConfig, Direction, UserRecord};
use crate::services::source::PageSource;

/// Records requested per page.
pub const PAGE_SIZE: usize = 100;

/// Consecutive all-known pages required before paging may halt.
pub const EARLY_STOP_THRESHOLD: usize = 3;

/// Whether the early-stop heuristic allows pagination to halt.
pub fn should_stop(consecutive_known_pages: usize) -> bool {
    consecutive_known_pages >= EARLY_STOP_THRESHOLD
}

/// Outcome of one paginated crawl.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Accumulated records, in upstream order, unique by id
    pub users: Vec<UserRecord>,
    /// Halted by the early-stop heuristic
    pub stopped_early: bool,
    /// Halted by a failed page or cancellation
    pub incomplete: bool,
    /// Halted because the cancellation token fired
    pub cancelled: bool,
    /// Message of the page failure that ended the crawl
    pub error: Option<String>,
    /// Number of page requests issued
    pub pages_fetched: usize,
}

impl FetchResult {
    /// Whether the list must be completed from the previous snapshot.
    pub fn needs_merge(&self, merge_on_error: bool) -> bool {
        self.stopped_early || (self.incomplete && merge_on_error)
    }

    /// Status recorded on the snapshot for this direction.
    pub fn status(&self, merged: bool) -> CrawlStatus {
        CrawlStatus {
            stopped_early: self.stopped_early,
            incomplete: self.incomplete,
            merged,
            pages_fetched: self.pages_fetched,
            error: self.error.clone(),
        }
    }

    fn fail(&mut self, message: String) {
        self.incomplete = true;
        self.error = Some(message);
    }
}

/// Drives cursor pagination against a [`PageSource`].
#[derive(Debug, Clone)]
pub struct PagedFetcher {
    delay: Duration,
    page_timeout: Duration,
    cancel: CancellationToken,
}

impl PagedFetcher {
    /// Create a fetcher using the configured delay and timeout.
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            delay: config.request_delay(),
            page_timeout: config.page_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_page_timeout(mut self, page_timeout: Duration) -> Self {
        self.page_timeout = page_timeout;
        self
    }

    /// Abort pagination between pages once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Crawl one direction for `user_id`.
    ///
    /// `known` holds the ids seen in previous cycles; `None` forces a full
    /// crawl. Page failures never surface as errors: the crawl ends and the
    /// result is flagged `incomplete`.
    pub async fn run(
        &self,
        direction: Direction,
        user_id: &str,
        source: &dyn PageSource,
        known: Option<&HashSet<String>>,
    ) -> FetchResult {
        let mut result = FetchResult::default();
        if user_id.trim().is_empty() {
            result.fail("empty user id".to_string());
            return result;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut consecutive_known = 0;

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("{} crawl for {} cancelled", direction, user_id);
                result.cancelled = true;
                result.incomplete = true;
                break;
            }

            result.pages_fetched += 1;
            let page_number = result.pages_fetched;
            let request = source.fetch_page(user_id, PAGE_SIZE, cursor.as_deref());
            let page = match tokio::time::timeout(self.page_timeout, request).await {
                Ok(Ok(page)) if page.success => page,
                Ok(Ok(page)) => {
                    let message = page.error.unwrap_or_else(|| "unknown error".to_string());
                    log::warn!(
                        "{} page {} for {} failed: {}",
                        direction,
                        page_number,
                        user_id,
                        message
                    );
                    result.fail(message);
                    break;
                }
                Ok(Err(e)) => {
                    log::warn!(
                        "{} page {} for {} failed: {}",
                        direction,
                        page_number,
                        user_id,
                        e
                    );
                    result.fail(e.to_string());
                    break;
                }
                Err(_) => {
                    log::warn!(
                        "{} page {} for {} timed out after {:?}",
                        direction,
                        page_number,
                        user_id,
                        self.page_timeout
                    );
                    result.fail(format!("timed out after {:?}", self.page_timeout));
                    break;
                }
            };

            let next_cursor = page.continuation().map(str::to_string);
            let page_len = page.users.len();
            let mut appended = 0;
            let mut new_ids = 0;
            for user in page.users {
                if !seen.insert(user.id.clone()) {
                    continue;
                }
                if known.is_some_and(|known| !known.contains(&user.id)) {
                    new_ids += 1;
                }
                appended += 1;
                result.users.push(user);
            }

            log::debug!(
                "{} page {} for {}: {} records, {} appended, {} new, more={}",
                direction,
                page_number,
                user_id,
                page_len,
                appended,
                new_ids,
                next_cursor.is_some()
            );

            // Reaching the real end beats stopping early: the list is then exhaustive.
            if page_len == 0 || next_cursor.is_none() {
                break;
            }

            if known.is_some() {
                if new_ids == 0 {
                    consecutive_known += 1;
                } else {
                    consecutive_known = 0;
                }
                if should_stop(consecutive_known) {
                    log::info!(
                        "Early stop for {} {} after page {}: {} consecutive pages without new ids",
                        user_id,
                        direction,
                        page_number,
                        consecutive_known
                    );
                    result.stopped_early = true;
                    break;
                }
            }

            cursor = next_cursor;

            if !self.delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        log::info!(
            "Fetched {} {} for {} in {} pages (stopped_early={}, incomplete={})",
            result.users.len(),
            direction,
            user_id,
            result.pages_fetched,
            result.stopped_early,
            result.incomplete
        );
        result
    }
}

impl Default for PagedFetcher {
    fn default() -> Self {
        Self::new(&CrawlerConfig::default())
    }
}
