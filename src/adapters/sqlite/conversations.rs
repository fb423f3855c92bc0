//! Conversation store.
//!
//! One row per (account_id, platform_thread_id). The upsert fills the
//! subject and participants forward and never blanks them; aggregate
//! columns belong to the merge engine and are only written through
//! recompute_aggregates_tx.

use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use super::DbPool;
use crate::error::Result;
use crate::types::{Conversation, Participant, PlatformKind};

/// Input shape for an upsert, produced by the grouper.
pub struct NewConversation {
    pub account_id: String,
    pub platform: PlatformKind,
    pub platform_thread_id: String,
    pub subject: Option<String>,
    pub participants: Vec<Participant>,
}

pub fn upsert_conversation(pool: &DbPool, conversation: &NewConversation) -> Result<String> {
    let conn = pool.get()?;
    upsert_conversation_tx(&conn, conversation)
}

/// Transaction-scoped upsert. Returns the canonical row id.
pub fn upsert_conversation_tx(conn: &Connection, conversation: &NewConversation) -> Result<String> {
    let now = chrono::Utc::now().timestamp_millis();
    let participants_json = serde_json::to_string(&conversation.participants)?;

    conn.execute(
        "INSERT INTO conversations (
            id, account_id, platform, platform_thread_id, subject,
            participants, message_count, last_activity_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?7)
        ON CONFLICT(account_id, platform_thread_id) DO UPDATE SET
            subject = COALESCE(excluded.subject, conversations.subject),
            participants = CASE
                WHEN excluded.participants != '[]' THEN excluded.participants
                ELSE conversations.participants
            END,
            updated_at = excluded.updated_at",
        params![
            Uuid::new_v4().to_string(),
            conversation.account_id,
            conversation.platform.as_str(),
            conversation.platform_thread_id,
            conversation.subject,
            participants_json,
            now,
        ],
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM conversations WHERE account_id = ?1 AND platform_thread_id = ?2",
        params![conversation.account_id, conversation.platform_thread_id],
        |row| row.get(0),
    )?;
    debug!(conversation_id = %id, thread = %conversation.platform_thread_id, "Upserted conversation");
    Ok(id)
}

pub fn get_conversation(
    pool: &DbPool,
    account_id: &str,
    platform_thread_id: &str,
) -> Result<Option<Conversation>> {
    let conn = pool.get()?;
    query_one(
        &conn,
        "SELECT id, account_id, platform, platform_thread_id, subject, participants,
                message_count, last_activity_at, created_at, updated_at
         FROM conversations WHERE account_id = ?1 AND platform_thread_id = ?2",
        params![account_id, platform_thread_id],
    )
}

/// Conversations of one account, most recently active first.
pub fn list_conversations(pool: &DbPool, account_id: &str) -> Result<Vec<Conversation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, account_id, platform, platform_thread_id, subject, participants,
                message_count, last_activity_at, created_at, updated_at
         FROM conversations WHERE account_id = ?1
         ORDER BY last_activity_at DESC",
    )?;
    let rows = stmt.query_map(params![account_id], row_to_conversation)?;
    let mut conversations = Vec::new();
    for row in rows {
        conversations.push(row?);
    }
    Ok(conversations)
}

/// All conversations in the store. Used by the propagation pass.
pub fn list_all_conversations(pool: &DbPool) -> Result<Vec<Conversation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, account_id, platform, platform_thread_id, subject, participants,
                message_count, last_activity_at, created_at, updated_at
         FROM conversations ORDER BY account_id, platform_thread_id",
    )?;
    let rows = stmt.query_map([], row_to_conversation)?;
    let mut conversations = Vec::new();
    for row in rows {
        conversations.push(row?);
    }
    Ok(conversations)
}

/// Rewrite the participants column only. Aggregates stay untouched.
pub fn update_participants(
    pool: &DbPool,
    conversation_id: &str,
    participants: &[Participant],
) -> Result<()> {
    let conn = pool.get()?;
    let json = serde_json::to_string(participants)?;
    conn.execute(
        "UPDATE conversations SET participants = ?1, updated_at = ?2 WHERE id = ?3",
        params![json, chrono::Utc::now().timestamp_millis(), conversation_id],
    )?;
    Ok(())
}

/// Recompute aggregate columns from the messages table. Aggregates are a
/// pure function of the message rows; this is the only write path for them.
pub fn recompute_aggregates_tx(conn: &Connection, conversation_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET
            message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1),
            last_activity_at = (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1),
            updated_at = ?2
         WHERE id = ?1",
        params![conversation_id, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn query_one(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Option<Conversation>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query_map(args, row_to_conversation)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let platform_text: String = row.get(2)?;
    let platform = PlatformKind::parse(&platform_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown platform: {}", platform_text).into(),
        )
    })?;
    let participants_json: String = row.get(5)?;
    let participants: Vec<Participant> = serde_json::from_str(&participants_json)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Conversation {
        id: row.get(0)?,
        account_id: row.get(1)?,
        platform,
        platform_thread_id: row.get(3)?,
        subject: row.get(4)?,
        participants,
        message_count: row.get(6)?,
        last_activity_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
