//! Sync orchestration
//!
//! `worker::run_sync` drives one full pass: every account, every connector,
//! fetch, resolve, merge, with per-account isolation. Tasks are the units of
//! work; helpers hold the small reusable pieces. Progress surfaces on a
//! flume channel so hosts can watch a run without being part of it.

pub mod helpers;
pub mod tasks;
pub mod worker;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::adapters::sqlite::DbPool;
use crate::config::SyncConfig;
use crate::connector::{BlobStore, PlatformConnector};
use crate::sync::locks::ConversationLocks;
use crate::sync::resolver::{IdentityResolver, RunCache};

/// Everything one run shares across its account tasks: collaborators,
/// settings, the run-scoped resolution cache, and the lock registry.
pub struct RunContext {
    pub pool: DbPool,
    pub connectors: Vec<Arc<dyn PlatformConnector>>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: SyncConfig,
    pub resolver: IdentityResolver,
    pub cache: Mutex<RunCache>,
    pub locks: ConversationLocks,
    pub events: flume::Sender<SyncEvent>,
}

impl RunContext {
    pub fn new(
        pool: DbPool,
        connectors: Vec<Arc<dyn PlatformConnector>>,
        blobs: Arc<dyn BlobStore>,
        config: SyncConfig,
        events: flume::Sender<SyncEvent>,
    ) -> Self {
        let resolver = IdentityResolver::new(pool.clone(), config.resolution_depth);
        Self {
            pool,
            connectors,
            blobs,
            config,
            resolver,
            cache: Mutex::new(RunCache::new()),
            locks: ConversationLocks::new(),
            events,
        }
    }
}

/// Account lifecycle during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPhase {
    Idle,
    Fetching,
    Resolving,
    Merging,
    Done,
    Failed,
}

impl AccountPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountPhase::Idle => "idle",
            AccountPhase::Fetching => "fetching",
            AccountPhase::Resolving => "resolving",
            AccountPhase::Merging => "merging",
            AccountPhase::Done => "done",
            AccountPhase::Failed => "failed",
        }
    }
}

/// One conversation that failed to sync. The account carried on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationError {
    pub platform_thread_id: String,
    pub error: String,
}

/// Outcome of one account within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub phase: AccountPhase,
    pub new_conversations: usize,
    pub new_messages: usize,
    pub backfilled_attachments: usize,
    pub resolved_identities: usize,
    pub errors: Vec<ConversationError>,
    /// Set when the whole account aborted (auth failure, listing failure).
    /// Counts above still reflect work completed before the abort.
    pub account_error: Option<String>,
}

impl AccountSummary {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            phase: AccountPhase::Idle,
            new_conversations: 0,
            new_messages: 0,
            backfilled_attachments: 0,
            resolved_identities: 0,
            errors: Vec::new(),
            account_error: None,
        }
    }
}

/// Outcome of one full run across all accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: i64,
    pub finished_at: i64,
    pub accounts: Vec<AccountSummary>,
}

impl RunSummary {
    pub fn total_new_messages(&self) -> usize {
        self.accounts.iter().map(|a| a.new_messages).sum()
    }

    pub fn total_new_conversations(&self) -> usize {
        self.accounts.iter().map(|a| a.new_conversations).sum()
    }
}

/// Progress notifications. Emission is best-effort: a dropped receiver
/// never blocks or fails the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    RunStarted {
        accounts: usize,
    },
    PhaseChanged {
        account_id: String,
        phase: AccountPhase,
    },
    ConversationMerged {
        account_id: String,
        platform_thread_id: String,
        new_messages: usize,
    },
    ConversationFailed {
        account_id: String,
        platform_thread_id: String,
        error: String,
    },
    AccountFinished {
        account_id: String,
        phase: AccountPhase,
    },
    RunFinished {
        total_new_messages: usize,
    },
}
