// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::Config;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.crawler.user_agent)
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()?;
    Ok(client)
}
