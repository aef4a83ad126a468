//! Test fakes shared by unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::UserRecord;
use crate::services::{PageResponse, PageSource};

/// Build records from ids; the handle is derived from the id.
pub fn users(ids: &[&str]) -> Vec<UserRecord> {
    ids.iter()
        .map(|id| UserRecord::new(*id, format!("user_{id}")))
        .collect()
}

/// Collect ids in order.
pub fn ids(users: &[UserRecord]) -> Vec<&str> {
    users.iter().map(|u| u.id.as_str()).collect()
}

enum Scripted {
    Page(Vec<UserRecord>),
    Failure(String),
    TransportError(String),
    Hang,
}

/// A page source that replays a fixed script and records every request.
///
/// Each successful page except the last hands out cursor `c<n>`; the last
/// one hands out the terminal `0|end` cursor.
pub struct ScriptedSource {
    script: Vec<Scripted>,
    requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script consisting only of the given pages.
    pub fn pages(pages: &[&[&str]]) -> Self {
        pages
            .iter()
            .fold(Self::new(), |source, page| source.page(page))
    }

    pub fn page(mut self, ids: &[&str]) -> Self {
        self.script.push(Scripted::Page(users(ids)));
        self
    }

    pub fn failure(mut self, message: &str) -> Self {
        self.script.push(Scripted::Failure(message.to_string()));
        self
    }

    pub fn transport_error(mut self, message: &str) -> Self {
        self.script.push(Scripted::TransportError(message.to_string()));
        self
    }

    /// A page that never answers in any reasonable time.
    pub fn hang(mut self) -> Self {
        self.script.push(Scripted::Hang);
        self
    }

    /// Number of requests issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Cursors passed with each request, in order.
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _user_id: &str,
        _page_size: usize,
        cursor: Option<&str>,
    ) -> Result<PageResponse> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(cursor.map(str::to_string));
            requests.len() - 1
        };

        let last = self.script.len().saturating_sub(1);
        match self.script.get(index) {
            Some(Scripted::Page(users)) => {
                let next = if index == last {
                    "0|end".to_string()
                } else {
                    format!("c{}", index + 1)
                };
                Ok(PageResponse::ok(users.clone(), Some(next)))
            }
            Some(Scripted::Failure(message)) => Ok(PageResponse::failure(message.clone())),
            Some(Scripted::TransportError(message)) => Err(AppError::validation(message.clone())),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(PageResponse::ok(Vec::new(), None))
            }
            None => Ok(PageResponse::ok(Vec::new(), None)),
        }
    }
}
