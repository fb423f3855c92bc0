//! Message store.
//!
//! Append-only: a message row never changes after insert except its
//! attachments column. Duplicate (conversation_id, platform_message_id)
//! pairs are ignored at insert, so replaying a batch is harmless.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};
use tracing::warn;
use uuid::Uuid;

use super::DbPool;
use crate::error::Result;
use crate::types::{AttachmentRecord, MessageRecord};

/// A message ready to be stored, decoupled from any platform wire shape.
pub struct NewMessage {
    pub conversation_id: String,
    pub account_id: String,
    pub platform_message_id: String,
    pub sender_identifier: String,
    pub sender_email: Option<String>,
    pub sender_display_name: Option<String>,
    pub sender_confidence: Option<u8>,
    pub body_text: Option<String>,
    pub label: Option<String>,
    pub attachments: Vec<AttachmentRecord>,
    pub created_at: i64,
}

/// Append messages atomically. Returns how many rows were actually inserted;
/// rows whose platform id already exists in the conversation are skipped.
pub fn append_messages(pool: &DbPool, messages: &[NewMessage]) -> Result<usize> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let count = append_messages_tx(&tx, messages)?;
    tx.commit()?;
    Ok(count)
}

pub fn append_messages_tx(conn: &Connection, messages: &[NewMessage]) -> Result<usize> {
    let mut count = 0;

    for msg in messages {
        let now = chrono::Utc::now().timestamp_millis();
        let attachments_json = serde_json::to_string(&msg.attachments)?;
        let result = conn.execute(
            "INSERT OR IGNORE INTO messages (
                id, conversation_id, account_id, platform_message_id,
                sender_identifier, sender_email, sender_display_name, sender_confidence,
                body_text, label, attachments, created_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                Uuid::new_v4().to_string(),
                msg.conversation_id,
                msg.account_id,
                msg.platform_message_id,
                msg.sender_identifier,
                msg.sender_email,
                msg.sender_display_name,
                msg.sender_confidence,
                msg.body_text,
                msg.label,
                attachments_json,
                msg.created_at,
                now,
            ],
        );

        match result {
            Ok(changed) => count += changed,
            Err(e) => warn!("Failed to insert message {}: {}", msg.platform_message_id, e),
        }
    }

    Ok(count)
}

/// Platform message ids already persisted for a conversation.
pub fn existing_platform_ids_tx(conn: &Connection, conversation_id: &str) -> Result<HashSet<String>> {
    let mut stmt =
        conn.prepare("SELECT platform_message_id FROM messages WHERE conversation_id = ?1")?;
    let rows = stmt.query_map(params![conversation_id], |row| row.get::<_, String>(0))?;
    let mut ids = HashSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

/// Stored attachments per platform message id, with the owning row id.
pub fn stored_attachments_tx(
    conn: &Connection,
    conversation_id: &str,
) -> Result<HashMap<String, (String, Vec<AttachmentRecord>)>> {
    let mut stmt = conn.prepare(
        "SELECT id, platform_message_id, attachments FROM messages WHERE conversation_id = ?1",
    )?;
    let rows = stmt.query_map(params![conversation_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut by_platform_id = HashMap::new();
    for row in rows {
        let (id, platform_message_id, attachments_json) = row?;
        let attachments: Vec<AttachmentRecord> = serde_json::from_str(&attachments_json)?;
        by_platform_id.insert(platform_message_id, (id, attachments));
    }
    Ok(by_platform_id)
}

/// Backfill the attachments column. The only permitted message mutation.
pub fn update_attachments_tx(
    conn: &Connection,
    message_id: &str,
    attachments: &[AttachmentRecord],
) -> Result<()> {
    let json = serde_json::to_string(attachments)?;
    conn.execute(
        "UPDATE messages SET attachments = ?1 WHERE id = ?2",
        params![json, message_id],
    )?;
    Ok(())
}

/// Messages of a conversation in canonical order: creation time, then
/// platform message id for equal timestamps.
pub fn fetch_conversation_messages(pool: &DbPool, conversation_id: &str) -> Result<Vec<MessageRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, account_id, platform_message_id,
                sender_identifier, sender_email, sender_display_name, sender_confidence,
                body_text, label, attachments, created_at, fetched_at
         FROM messages WHERE conversation_id = ?1
         ORDER BY created_at ASC, platform_message_id ASC",
    )?;
    let rows = stmt.query_map(params![conversation_id], row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    let attachments_json: String = row.get(10)?;
    let attachments: Vec<AttachmentRecord> = serde_json::from_str(&attachments_json)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        account_id: row.get(2)?,
        platform_message_id: row.get(3)?,
        sender_identifier: row.get(4)?,
        sender_email: row.get(5)?,
        sender_display_name: row.get(6)?,
        sender_confidence: row.get(7)?,
        body_text: row.get(8)?,
        label: row.get(9)?,
        attachments,
        created_at: row.get(11)?,
        fetched_at: row.get(12)?,
    })
}
