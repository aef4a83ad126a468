// src/services/platform.rs

//! REST client for the social platform.
//!
//! Provides handle resolution and the two directional [`PageSource`]s. The
//! bearer token is handed in by the caller; nothing here reads credentials.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Account, ApiConfig, Config, Direction, UserRecord};
use crate::services::source::{PageResponse, PageSource};
use crate::utils::http;

/// User object as returned by the platform.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    id: String,
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    followers_count: Option<u64>,
    #[serde(default)]
    following_count: Option<u64>,
    #[serde(default)]
    is_blue_verified: Option<bool>,
}

impl From<ApiUser> for UserRecord {
    fn from(user: ApiUser) -> Self {
        UserRecord {
            description: user.description.filter(|d| !d.is_empty()),
            followers_count: user.followers_count,
            following_count: user.following_count,
            is_blue_verified: user.is_blue_verified,
            name: user.name,
            ..UserRecord::new(user.id, user.username)
        }
    }
}

/// One page of a following/followers listing.
#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default, alias = "nextCursor")]
    next_cursor: Option<String>,
}

/// Read the bearer token from the environment variable named in `api.token_env`.
pub fn token_from_env(api: &ApiConfig) -> Result<String> {
    match std::env::var(&api.token_env) {
        Ok(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(AppError::MissingCredentials(format!(
            "environment variable {} is not set",
            api.token_env
        ))),
    }
}

/// Platform API client.
#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    /// Create a client for the configured API.
    pub fn new(config: &Config, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AppError::MissingCredentials("empty API token".into()));
        }
        url::Url::parse(&config.api.base_url)?;
        Ok(Self {
            client: http::create_async_client(config)?,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Resolve a handle to its stable account id.
    pub async fn resolve_account(&self, handle: &str) -> Result<Account> {
        let url = format!("{}/users/by/username/{}", self.base_url, handle);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(AppError::UserNotFound(handle.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::MissingCredentials(format!(
                    "API token rejected ({})",
                    resp.status()
                )));
            }
            _ => {}
        }

        let user: ApiUser = resp.error_for_status()?.json().await?;
        log::debug!("Resolved @{} to {}", user.username, user.id);
        Ok(Account::new(user.id, user.username))
    }

    /// Page source bound to one direction.
    pub fn pages(&self, direction: Direction) -> PlatformPages {
        PlatformPages {
            client: self.clone(),
            direction,
        }
    }

    async fn fetch_listing(
        &self,
        direction: Direction,
        user_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<PageResponse> {
        let url = format!("{}/users/{}/{}", self.base_url, user_id, direction);
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("count", page_size.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(PageResponse::failure(format!("HTTP {}: {}", status, body)));
        }

        let page: ApiPage = resp.json().await?;
        Ok(PageResponse::ok(
            page.users.into_iter().map(UserRecord::from).collect(),
            page.next_cursor,
        ))
    }
}

/// [`PageSource`] for one direction of the platform API.
pub struct PlatformPages {
    client: PlatformClient,
    direction: Direction,
}

#[async_trait]
impl PageSource for PlatformPages {
    async fn fetch_page(
        &self,
        user_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<PageResponse> {
        self.client
            .fetch_listing(self.direction, user_id, page_size, cursor)
            .await
    }
}
