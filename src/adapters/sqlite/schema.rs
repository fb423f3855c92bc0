use rusqlite::Connection;

use crate::adapters::sqlite::DbPool;
use crate::error::Result;

pub fn initialize(pool: &DbPool) -> Result<()> {
    let conn = pool.get()?;
    initialize_schema(&conn)
}

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Accounts under sync. The id is the account email address.
        CREATE TABLE IF NOT EXISTS accounts (
            id                  TEXT PRIMARY KEY,   -- email address
            email               TEXT NOT NULL UNIQUE,
            display_name        TEXT,
            last_mail_synced_at INTEGER,            -- unix epoch ms, set on Done only
            last_chat_synced_at INTEGER,
            created_at          INTEGER NOT NULL    -- unix epoch ms
        );

        -- One row per platform thread/space, regardless of fetch label.
        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,   -- UUID
            account_id          TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            platform            TEXT NOT NULL,      -- 'mail' | 'chat'
            platform_thread_id  TEXT NOT NULL,
            subject             TEXT,               -- mail subject or space display name
            participants        TEXT NOT NULL DEFAULT '[]',  -- JSON array of Participant
            -- Aggregates. Written only by the merge engine from recomputed
            -- values, never incremented in place.
            message_count       INTEGER NOT NULL DEFAULT 0,
            last_activity_at    INTEGER,            -- max message created_at
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,

            UNIQUE(account_id, platform_thread_id)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_account  ON conversations(account_id, last_activity_at DESC);

        -- Message store. Rows are immutable after insert except the
        -- attachments column, which merge passes may backfill.
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,   -- UUID
            conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            account_id          TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            platform_message_id TEXT NOT NULL,
            sender_identifier   TEXT NOT NULL,      -- opaque upstream identifier
            sender_email        TEXT,               -- resolved
            sender_display_name TEXT,               -- resolved
            sender_confidence   INTEGER,            -- 0-100 at resolution time
            body_text           TEXT,
            label               TEXT,               -- fetch label ('incoming' | 'outgoing' | ...)
            attachments         TEXT NOT NULL DEFAULT '[]',  -- JSON array of AttachmentRecord
            created_at          INTEGER NOT NULL,   -- platform timestamp, epoch ms
            fetched_at          INTEGER NOT NULL,

            UNIQUE(conversation_id, platform_message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_messages_sender       ON messages(sender_identifier);

        -- Identity mappings. Confidence is monotonically non-decreasing;
        -- profile fields only move forward via the max-confidence upsert.
        CREATE TABLE IF NOT EXISTS identity_mappings (
            id              TEXT PRIMARY KEY,   -- UUID
            external_id     TEXT NOT NULL UNIQUE,
            email           TEXT,
            display_name    TEXT,
            domain          TEXT,
            confidence      INTEGER NOT NULL,   -- 0-100
            provenance      TEXT NOT NULL,      -- 'directory' | 'email' | 'placeholder' | 'seed'
            seen_count      INTEGER NOT NULL DEFAULT 1,
            first_seen      INTEGER NOT NULL,   -- unix epoch ms
            last_seen       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_identity_email ON identity_mappings(email);

        -- Alternate identifiers pointing at a canonical mapping row.
        CREATE TABLE IF NOT EXISTS identity_aliases (
            alias           TEXT PRIMARY KEY,
            identity_id     TEXT NOT NULL REFERENCES identity_mappings(id) ON DELETE CASCADE,
            added_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_identity_aliases_identity ON identity_aliases(identity_id);
    ",
    )?;

    Ok(())
}
