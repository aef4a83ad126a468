//! Circuit Breaker for snapshot commits.
//!
//! Refuses to persist a list that was cut short by a failed page and came
//! back far smaller than the previous one. Lists that reached the end of
//! the listing are never checked.

use crate::error::{AppError, Result};
use crate::models::{Direction, GuardConfig, UserRecord};

/// Circuit breaker for preventing bad snapshot commits.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: GuardConfig,
}

/// Result of circuit breaker check.
#[derive(Debug, Clone)]
pub enum CircuitBreakerResult {
    /// Safe to proceed with the write
    Safe {
        current_count: usize,
        previous_count: usize,
    },
    /// First run or below baseline
    ColdStart { current_count: usize },
    /// Circuit breaker triggered - abort write
    Triggered {
        current_count: usize,
        previous_count: usize,
        drop_percent: f64,
    },
    /// Empty result where there used to be connections
    EmptyResult,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Compare the new list for one direction against the previous one.
    pub fn check(&self, current: &[UserRecord], previous: &[UserRecord]) -> CircuitBreakerResult {
        let current_count = current.len();
        let previous_count = previous.len();

        if current_count == 0 {
            if previous_count == 0 && self.config.allow_cold_start {
                return CircuitBreakerResult::ColdStart { current_count };
            }
            if previous_count >= self.config.min_baseline {
                return CircuitBreakerResult::EmptyResult;
            }
        }

        if previous_count < self.config.min_baseline {
            return CircuitBreakerResult::ColdStart { current_count };
        }

        if current_count < previous_count {
            let drop = previous_count - current_count;
            let drop_percent = (drop as f64 / previous_count as f64) * 100.0;

            if drop_percent > self.config.max_drop_percent as f64 {
                return CircuitBreakerResult::Triggered {
                    current_count,
                    previous_count,
                    drop_percent,
                };
            }
        }

        CircuitBreakerResult::Safe {
            current_count,
            previous_count,
        }
    }

    /// Validate and return Ok if safe, Err if circuit breaker triggered.
    pub fn validate(
        &self,
        direction: Direction,
        current: &[UserRecord],
        previous: &[UserRecord],
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.check(current, previous) {
            CircuitBreakerResult::Safe {
                current_count,
                previous_count,
            } => {
                log::debug!(
                    "Circuit breaker ({}): SAFE ({} accounts, was {})",
                    direction,
                    current_count,
                    previous_count
                );
                Ok(())
            }
            CircuitBreakerResult::ColdStart { current_count } => {
                log::debug!(
                    "Circuit breaker ({}): COLD START ({} accounts, first run or below baseline)",
                    direction,
                    current_count
                );
                Ok(())
            }
            CircuitBreakerResult::Triggered {
                current_count,
                previous_count,
                drop_percent,
            } => {
                log::error!(
                    "Circuit breaker ({}): TRIGGERED! {} → {} accounts ({:.1}% drop > {}% threshold)",
                    direction,
                    previous_count,
                    current_count,
                    drop_percent,
                    self.config.max_drop_percent
                );
                Err(AppError::CircuitBreakerTriggered {
                    direction: direction.to_string(),
                    current_count,
                    previous_count,
                    drop_percent,
                    threshold_percent: self.config.max_drop_percent,
                })
            }
            CircuitBreakerResult::EmptyResult => {
                log::error!("Circuit breaker ({}): EMPTY RESULT - aborting write", direction);
                Err(AppError::EmptyCrawlResult(direction.to_string()))
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
