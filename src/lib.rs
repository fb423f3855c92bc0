//! convosync - conversation sync core for mail and chat workspaces
//!
//! Synchronizes messages from a threaded-mail platform and a space-based
//! chat platform into one local store: opaque sender identifiers resolve to
//! stable profiles, per-label listings group into one conversation per
//! thread, attachments reconcile across passes, and incremental merges
//! never lose previously retrieved data.
//!
//! ## Module Organization
//!
//! - `connector/`: platform and blob-store traits callers implement
//! - `types/`: data structures and types
//! - `config/`: configuration management
//! - `adapters/`: SQLite persistence
//! - `sync/`: grouping, attachment reconciliation, identity resolution,
//!   the merge transaction, per-conversation locks
//! - `services/`: orchestration (run over all accounts, background tasks)
//! - `error`: shared error taxonomy
//!
//! Hosts bring their own connectors and blob store, register accounts, and
//! call [`run_sync`]; progress is observable on a [`SyncEvent`] channel.

pub mod adapters;
pub mod config;
pub mod connector;
pub mod error;
pub mod services;
pub mod sync;
pub mod types;

pub use adapters::sqlite::pool::create_pool;
pub use adapters::sqlite::schema::initialize;
pub use adapters::sqlite::DbPool;
pub use config::{ResolutionDepth, SyncConfig};
pub use connector::{BlobStore, PlatformConnector};
pub use error::{Result, SyncError};
pub use services::sync::tasks::run_identity_propagation;
pub use services::sync::worker::run_sync;
pub use services::sync::{AccountPhase, AccountSummary, RunSummary, SyncEvent};
pub use sync::resolver::{IdentityResolver, RunCache};
