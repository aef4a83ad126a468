//! Snapshot pipeline.
//!
//! - `crawl`: one crawl cycle per account, and the multi-account runner
//! - `merge`: completing an early-stopped crawl from the previous snapshot
//! - `index`: write-once first-seen timestamps
//! - `analyze`: mutual / one-sided connection sets
//! - `diff`: changes between consecutive snapshots
//! - `circuit_breaker`: refusing implausible mass drops
//! - `lock`: one cycle per account at a time

pub mod analyze;
pub mod circuit_breaker;
pub mod crawl;
pub mod diff;
pub mod index;
pub mod lock;
pub mod merge;

pub use analyze::{ConnectionSets, analyze_connections};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerResult};
pub use crawl::{CrawlCycle, CycleOptions, CycleReport, assemble_snapshot, run_crawler};
pub use diff::{DiffCalculator, DiffResult, SnapshotDiff, diff_snapshots, diff_users, new_mutuals};
pub use index::FirstSeenIndex;
pub use lock::AccountLocks;
pub use merge::merge_with_previous;
