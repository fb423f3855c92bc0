//! Background identity propagation.
//!
//! Conversations persist the roster that was resolvable at merge time. As
//! the mapping store improves on later runs, this pass re-resolves every
//! stored participant against the store alone and rewrites entries a
//! strictly higher-confidence mapping now covers. Messages keep the sender
//! fields they were inserted with; only the conversation roster moves.

use tracing::{info, warn};

use crate::adapters::sqlite::{self, DbPool};
use crate::config::ResolutionDepth;
use crate::error::Result;
use crate::sync::locks::ConversationLocks;
use crate::sync::resolver::{IdentityResolver, RunCache};
use crate::types::identity::Provenance;

/// Walk every conversation and upgrade roster entries from the mapping
/// store. Never queries a platform directory. Returns the number of
/// conversations rewritten.
pub async fn run_identity_propagation(
    pool: &DbPool,
    locks: &ConversationLocks,
    min_display_confidence: u8,
) -> Result<usize> {
    let resolver = IdentityResolver::new(pool.clone(), ResolutionDepth::StoreOnly);
    let mut cache = RunCache::new();
    let conversations = sqlite::conversations::list_all_conversations(pool)?;

    let mut updated = 0;
    for snapshot in &conversations {
        let lock = locks
            .for_thread(&snapshot.account_id, &snapshot.platform_thread_id)
            .await;
        let _guard = lock.lock().await;

        // The snapshot is only a worklist. A merge may have rewritten the
        // roster while this pass waited on the lock; decide against the
        // current row, never the snapshot.
        let conversation = match sqlite::conversations::get_conversation(
            pool,
            &snapshot.account_id,
            &snapshot.platform_thread_id,
        ) {
            Ok(Some(conversation)) => conversation,
            Ok(None) => continue,
            Err(err) => {
                warn!(
                    conversation_id = %snapshot.id,
                    error = %err,
                    "Roster re-read failed, continuing with next conversation"
                );
                continue;
            }
        };

        let mut participants = conversation.participants.clone();
        let mut changed = false;

        for participant in &mut participants {
            let identity = resolver.resolve(&mut cache, None, &participant.identifier).await;
            // A placeholder result means the store still has nothing real
            // for this identifier.
            if identity.provenance == Provenance::Placeholder {
                continue;
            }
            if identity.confidence <= participant.confidence {
                continue;
            }
            participant.resolved_email = identity.email.clone();
            participant.display_name = identity
                .display_name
                .clone()
                .filter(|_| identity.confidence >= min_display_confidence);
            participant.confidence = identity.confidence;
            changed = true;
        }

        if !changed {
            continue;
        }

        match sqlite::conversations::update_participants(pool, &conversation.id, &participants) {
            Ok(()) => updated += 1,
            Err(err) => {
                warn!(
                    conversation_id = %conversation.id,
                    error = %err,
                    "Participant rewrite failed, continuing with next conversation"
                );
            }
        }
    }

    info!(
        conversations = conversations.len(),
        updated, "Identity propagation finished"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::identities::{upsert_identity_mapping, NewIdentityMapping};
    use crate::adapters::sqlite::{accounts, conversations, messages, pool::create_pool, schema};
    use crate::sync::grouper::ThreadGroup;
    use crate::sync::merge::merge_thread_group;
    use crate::types::identity::Identity;
    use crate::types::{Participant, ParticipantRole, PlatformKind};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("sync.db")).unwrap();
        schema::initialize(&pool).unwrap();
        accounts::ensure_account(&pool, "team@example.com", None).unwrap();
        (dir, pool)
    }

    fn placeholder_identity(identifier: &str) -> Identity {
        Identity {
            external_id: identifier.to_string(),
            email: Some("unknown-9f3a5b2c1d0e@unresolved.invalid".to_string()),
            display_name: Some("Unknown sender 9f3a5b".to_string()),
            domain: Some("unresolved.invalid".to_string()),
            confidence: 25,
            provenance: Provenance::Placeholder,
        }
    }

    fn seed_conversation(pool: &DbPool, identifier: &str, confidence: u8) -> String {
        let group = ThreadGroup {
            platform_thread_id: "spaces/S1".to_string(),
            subject: Some("Standup".to_string()),
            messages: vec![crate::services::sync::testing::message(
                "c1", "spaces/S1", identifier, "space", 1_000,
            )],
        };
        let mut resolved = HashMap::new();
        resolved.insert(identifier.to_string(), placeholder_identity(identifier));
        let participants = vec![Participant {
            identifier: identifier.to_string(),
            resolved_email: Some("unknown-9f3a5b2c1d0e@unresolved.invalid".to_string()),
            display_name: None,
            role: ParticipantRole::Sender,
            confidence,
        }];
        merge_thread_group(
            pool,
            "team@example.com",
            PlatformKind::Chat,
            &group,
            &resolved,
            &participants,
        )
        .unwrap()
        .conversation_id
    }

    fn directory_mapping(identifier: &str, confidence: u8) -> NewIdentityMapping {
        NewIdentityMapping {
            external_id: identifier.to_string(),
            email: Some("ada@example.com".to_string()),
            display_name: Some("Ada Lovelace".to_string()),
            domain: Some("example.com".to_string()),
            confidence,
            provenance: Provenance::Directory,
            seen_at: 1_000,
        }
    }

    #[tokio::test]
    async fn placeholder_participants_upgrade_from_the_store() {
        let (_dir, pool) = test_pool();
        let conversation_id = seed_conversation(&pool, "users/99", 25);
        upsert_identity_mapping(&pool, &directory_mapping("users/99", 100), &[]).unwrap();

        let updated = run_identity_propagation(&pool, &ConversationLocks::new(), 40)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let conversation = conversations::list_conversations(&pool, "team@example.com")
            .unwrap()
            .remove(0);
        let participant = &conversation.participants[0];
        assert_eq!(participant.identifier, "users/99");
        assert_eq!(participant.resolved_email.as_deref(), Some("ada@example.com"));
        assert_eq!(participant.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(participant.confidence, 100);
        assert_eq!(participant.role, ParticipantRole::Sender);

        // Messages are immutable; the historical sender snapshot stays.
        let stored = messages::fetch_conversation_messages(&pool, &conversation_id).unwrap();
        assert_eq!(
            stored[0].sender_email.as_deref(),
            Some("unknown-9f3a5b2c1d0e@unresolved.invalid")
        );
    }

    #[tokio::test]
    async fn a_merge_landing_mid_pass_is_not_overwritten() {
        let (_dir, pool) = test_pool();
        seed_conversation(&pool, "users/99", 25);
        upsert_identity_mapping(&pool, &directory_mapping("users/99", 100), &[]).unwrap();

        // Act as a concurrent account sync: hold the conversation's write
        // lock while the propagation pass starts up and snapshots.
        let locks = Arc::new(ConversationLocks::new());
        let lock = locks.for_thread("team@example.com", "spaces/S1").await;
        let guard = lock.lock().await;

        let pass = {
            let pool = pool.clone();
            let locks = locks.clone();
            tokio::spawn(async move { run_identity_propagation(&pool, &locks, 40).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The merge this lock protects adds a second sender to the roster.
        let group = ThreadGroup {
            platform_thread_id: "spaces/S1".to_string(),
            subject: None,
            messages: vec![crate::services::sync::testing::message(
                "c2", "spaces/S1", "users/77", "space", 2_000,
            )],
        };
        let mut resolved = HashMap::new();
        resolved.insert("users/77".to_string(), placeholder_identity("users/77"));
        let roster = vec![
            Participant {
                identifier: "users/99".to_string(),
                resolved_email: Some("unknown-9f3a5b2c1d0e@unresolved.invalid".to_string()),
                display_name: None,
                role: ParticipantRole::Sender,
                confidence: 25,
            },
            Participant {
                identifier: "users/77".to_string(),
                resolved_email: Some("unknown-9f3a5b2c1d0e@unresolved.invalid".to_string()),
                display_name: None,
                role: ParticipantRole::Sender,
                confidence: 25,
            },
        ];
        merge_thread_group(
            &pool,
            "team@example.com",
            PlatformKind::Chat,
            &group,
            &resolved,
            &roster,
        )
        .unwrap();
        drop(guard);

        let updated = pass.await.unwrap().unwrap();
        assert_eq!(updated, 1);

        let conversation = conversations::list_conversations(&pool, "team@example.com")
            .unwrap()
            .remove(0);
        // Both the upgrade and the mid-pass addition survive.
        assert_eq!(conversation.participants.len(), 2);
        let upgraded = conversation
            .participants
            .iter()
            .find(|p| p.identifier == "users/99")
            .unwrap();
        assert_eq!(upgraded.resolved_email.as_deref(), Some("ada@example.com"));
        assert_eq!(upgraded.confidence, 100);
        assert!(conversation
            .participants
            .iter()
            .any(|p| p.identifier == "users/77" && p.confidence == 25));
    }

    #[tokio::test]
    async fn rosters_without_better_mappings_are_left_alone() {
        let (_dir, pool) = test_pool();
        seed_conversation(&pool, "users/42", 25);

        let updated = run_identity_propagation(&pool, &ConversationLocks::new(), 40)
            .await
            .unwrap();
        assert_eq!(updated, 0);

        let conversation = conversations::list_conversations(&pool, "team@example.com")
            .unwrap()
            .remove(0);
        assert_eq!(conversation.participants[0].confidence, 25);
    }

    #[tokio::test]
    async fn upgraded_names_still_respect_the_display_floor() {
        let (_dir, pool) = test_pool();
        seed_conversation(&pool, "users/7", 25);
        upsert_identity_mapping(&pool, &directory_mapping("users/7", 50), &[]).unwrap();

        let updated = run_identity_propagation(&pool, &ConversationLocks::new(), 60)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let conversation = conversations::list_conversations(&pool, "team@example.com")
            .unwrap()
            .remove(0);
        let participant = &conversation.participants[0];
        assert_eq!(participant.resolved_email.as_deref(), Some("ada@example.com"));
        assert!(participant.display_name.is_none());
        assert_eq!(participant.confidence, 50);
    }
}
