pub mod accounts;
pub mod conversations;
pub mod identities;
pub mod messages;
pub mod pool;
pub mod schema;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
// instead of `use crate::adapters::sqlite::pool::DbPool`
pub use pool::DbPool;
