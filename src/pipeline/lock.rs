//! Per-account serialization of crawl cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry handing out one async mutex per account id.
///
/// Cycles for the same account queue behind each other; different accounts
/// never contend.
#[derive(Debug, Clone, Default)]
pub struct AccountLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(account_id.to_string()).or_default())
    }

    /// Wait until no other cycle holds `account_id`, then hold it.
    pub async fn acquire(&self, account_id: &str) -> OwnedMutexGuard<()> {
        if let Some(guard) = self.try_acquire(account_id) {
            return guard;
        }
        log::info!("Waiting for running cycle of account {}", account_id);
        self.lock_for(account_id).lock_owned().await
    }

    /// Hold `account_id` only if it is free.
    pub fn try_acquire(&self, account_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(account_id).try_lock_owned().ok()
    }
}
