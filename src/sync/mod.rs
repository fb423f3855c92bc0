//! Sync core
//!
//! Pure-logic pieces of the sync pipeline: thread grouping, attachment
//! reconciliation, the identity resolution cascade, the merge transaction,
//! and the per-conversation lock registry. Orchestration lives in
//! `services::sync`.

pub mod attachments;
pub mod grouper;
pub mod locks;
pub mod merge;
pub mod resolver;
