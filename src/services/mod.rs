//! Service layer for the graph crawler.
//!
//! This module contains the upstream-facing logic:
//! - Page-fetch capability (`PageSource`)
//! - Paginated crawling with early stop (`PagedFetcher`)
//! - Platform REST client (`PlatformClient`)

mod fetcher;
mod platform;
mod source;

pub use fetcher::{EARLY_STOP_THRESHOLD, FetchResult, PAGE_SIZE, PagedFetcher, should_stop};
pub use platform::{PlatformClient, PlatformPages, token_from_env};
pub use source::{PageResponse, PageSource, is_terminal_cursor};
