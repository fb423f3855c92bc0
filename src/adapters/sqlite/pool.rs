use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::Result;

// Shorthand so callers don't spell out Pool<SqliteConnectionManager>
// everywhere.
pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_pool(db_path: &Path) -> Result<DbPool> {
    // Pragmas run per connection: journal_mode is database-wide once set,
    // but foreign_keys, synchronous and the busy timeout are not.
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -8000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
    });

    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}
