// src/models/mod.rs

//! Domain models for the graph crawler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod snapshot;
mod user;

// Re-export all public types
pub use config::{ApiConfig, Config, CrawlerConfig, GuardConfig, StorageConfig};
pub use snapshot::{CrawlStatus, SCHEMA_VERSION, Snapshot};
pub use user::{Account, Direction, UserRecord};
