//! Per-conversation write locks.
//!
//! All writers that touch one conversation (account sync tasks, the
//! identity propagation pass) serialize on its lock, keyed by the
//! pre-persistence identity (account id, platform thread id). Locks are
//! created on first use and shared for the life of the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct ConversationLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for one conversation. Hold the guard across the whole
    /// merge transaction.
    pub async fn for_thread(&self, account_id: &str, platform_thread_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{}::{}", account_id, platform_thread_id);
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(&key) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
