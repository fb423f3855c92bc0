//! Business logic services
//!
//! Orchestration-level logic that drives the sync core. Everything here is
//! host-agnostic: callers hand in connectors, a blob store, and a database
//! pool, and observe progress through the event channel.

pub mod sync;
