//! Account registry for the sync store.
//!
//! Accounts are registered by callers before a run; the orchestrator only
//! reads them. Watermarks advance when an account's sync reaches Done, so a
//! failed account keeps its previous watermark.

use tracing::debug;

use super::DbPool;
use crate::error::{Result, SyncError};
use crate::types::{Account, PlatformKind};

/// Ensure an account row exists. The id is the account email address.
pub fn ensure_account(pool: &DbPool, account_id: &str, display_name: Option<&str>) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR IGNORE INTO accounts (id, email, display_name, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            account_id,
            account_id,
            display_name,
            chrono::Utc::now().timestamp_millis()
        ],
    )?;
    debug!(account_id = %account_id, "Ensured account row");
    Ok(())
}

pub fn get_account(pool: &DbPool, account_id: &str) -> Result<Option<Account>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, last_mail_synced_at, last_chat_synced_at, created_at
         FROM accounts WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(rusqlite::params![account_id], row_to_account)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn list_accounts(pool: &DbPool) -> Result<Vec<Account>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, last_mail_synced_at, last_chat_synced_at, created_at
         FROM accounts ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map([], row_to_account)?;
    let mut accounts = Vec::new();
    for row in rows {
        accounts.push(row?);
    }
    Ok(accounts)
}

/// Advance one platform's watermark after a completed sync.
pub fn update_watermark(
    pool: &DbPool,
    account_id: &str,
    platform: PlatformKind,
    synced_at: i64,
) -> Result<()> {
    let conn = pool.get()?;
    let column = match platform {
        PlatformKind::Mail => "last_mail_synced_at",
        PlatformKind::Chat => "last_chat_synced_at",
    };
    let updated = conn.execute(
        &format!("UPDATE accounts SET {} = ?1 WHERE id = ?2", column),
        rusqlite::params![synced_at, account_id],
    )?;
    if updated == 0 {
        return Err(SyncError::AccountNotFound(account_id.to_string()));
    }
    debug!(account_id = %account_id, platform = platform.as_str(), synced_at, "Watermark advanced");
    Ok(())
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        last_mail_synced_at: row.get(3)?,
        last_chat_synced_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}
