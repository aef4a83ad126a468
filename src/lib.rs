// src/lib.rs

//! Follower graph crawler library.
//!
//! Tracks who monitored accounts follow and who follows them, one snapshot
//! per crawl cycle, and reports what changed between cycles.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
