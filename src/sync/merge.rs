//! Incremental merge engine.
//!
//! Takes one grouped thread and folds it into the store inside a single
//! transaction: seen messages may only gain attachment data, new messages
//! append verbatim, and the conversation's aggregate columns are recomputed
//! from the message rows. A failure rolls the whole merge back, leaving the
//! prior persisted state intact.

use std::collections::HashMap;

use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use crate::adapters::sqlite::{conversations, messages, DbPool};
use crate::error::Result;
use crate::sync::attachments;
use crate::sync::grouper::ThreadGroup;
use crate::types::identity::Identity;
use crate::types::{Participant, PlatformKind};

/// What one merge pass changed.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub conversation_id: String,
    pub created_conversation: bool,
    pub new_messages: usize,
    pub backfilled_attachments: usize,
}

/// Merge one thread group for an account.
///
/// `resolved` maps sender identifiers to their resolved identities;
/// `participants` is the conversation-level roster the caller assembled.
/// Re-running with the same group is a no-op.
pub fn merge_thread_group(
    pool: &DbPool,
    account_id: &str,
    platform: PlatformKind,
    group: &ThreadGroup,
    resolved: &HashMap<String, Identity>,
    participants: &[Participant],
) -> Result<MergeOutcome> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;

    let existed_before: Option<String> = tx
        .query_row(
            "SELECT id FROM conversations WHERE account_id = ?1 AND platform_thread_id = ?2",
            rusqlite::params![account_id, group.platform_thread_id],
            |row| row.get(0),
        )
        .optional()?;

    let conversation_id = conversations::upsert_conversation_tx(
        &tx,
        &conversations::NewConversation {
            account_id: account_id.to_string(),
            platform,
            platform_thread_id: group.platform_thread_id.clone(),
            subject: group.subject.clone(),
            participants: participants.to_vec(),
        },
    )?;

    let existing_ids = messages::existing_platform_ids_tx(&tx, &conversation_id)?;
    let stored_attachments = messages::stored_attachments_tx(&tx, &conversation_id)?;

    let mut new_rows: Vec<messages::NewMessage> = Vec::new();
    let mut backfilled_attachments = 0;

    for message in &group.messages {
        let incoming_records: Vec<_> = message.attachments.iter().map(attachments::to_record).collect();

        if existing_ids.contains(&message.platform_message_id) {
            // Seen before: the only permitted change is attachment backfill.
            let Some((row_id, existing_records)) = stored_attachments.get(&message.platform_message_id)
            else {
                warn!(
                    platform_message_id = %message.platform_message_id,
                    "Message id known but row missing; skipping attachment reconcile"
                );
                continue;
            };
            let (merged, filled) =
                attachments::merge_attachment_lists(existing_records, &incoming_records);
            if filled > 0 || merged.len() != existing_records.len() {
                messages::update_attachments_tx(&tx, row_id, &merged)?;
            }
            backfilled_attachments += filled;
        } else {
            let identity = resolved.get(&message.sender_identifier);
            new_rows.push(messages::NewMessage {
                conversation_id: conversation_id.clone(),
                account_id: account_id.to_string(),
                platform_message_id: message.platform_message_id.clone(),
                sender_identifier: message.sender_identifier.clone(),
                sender_email: identity.and_then(|i| i.email.clone()),
                sender_display_name: identity.and_then(|i| i.display_name.clone()),
                sender_confidence: identity.map(|i| i.confidence),
                body_text: message.body_text.clone(),
                label: message.label.clone(),
                attachments: incoming_records,
                created_at: message.created_at,
            });
        }
    }

    let new_messages = messages::append_messages_tx(&tx, &new_rows)?;
    conversations::recompute_aggregates_tx(&tx, &conversation_id)?;
    tx.commit()?;

    debug!(
        conversation_id = %conversation_id,
        thread = %group.platform_thread_id,
        new_messages,
        backfilled_attachments,
        "Merged thread group"
    );

    Ok(MergeOutcome {
        conversation_id,
        created_conversation: existed_before.is_none(),
        new_messages,
        backfilled_attachments,
    })
}
