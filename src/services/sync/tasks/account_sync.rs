//! One account's sync pass.
//!
//! Each platform connector moves the account through Fetching, Resolving,
//! Merging; the account ends Done only when every platform completed, and
//! Failed when an account-fatal error (auth, conversation listing) aborted
//! it. A failure on one conversation is recorded and skipped; it never
//! aborts the account.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, warn};

use crate::adapters::sqlite;
use crate::connector::{BlobStore, PlatformConnector};
use crate::error::{Result, SyncError};
use crate::services::sync::helpers::backoff::with_retry;
use crate::services::sync::{
    AccountPhase, AccountSummary, ConversationError, RunContext, SyncEvent,
};
use crate::sync::grouper::{self, FetchedThread, ThreadGroup};
use crate::sync::merge;
use crate::types::identity::Identity;
use crate::types::{
    Account, FetchedMessage, Participant, ParticipantRole, PlatformKind, RemoteConversation,
};

pub async fn run_account_sync(ctx: &RunContext, account: &Account) -> AccountSummary {
    let mut summary = AccountSummary::new(&account.id);
    let started_at = chrono::Utc::now().timestamp_millis();

    for connector in &ctx.connectors {
        if let Err(err) = sync_platform(ctx, account, connector.as_ref(), &mut summary).await {
            error!(
                account_id = %account.id,
                platform = connector.platform().as_str(),
                error = %err,
                "Account sync aborted"
            );
            summary.account_error = Some(err.to_string());
            set_phase(&mut summary, &ctx.events, AccountPhase::Failed);
            return summary;
        }
    }

    // Watermarks move only on a fully successful pass; a stale watermark
    // just means the next run re-fetches a window the merge will no-op.
    for connector in &ctx.connectors {
        if let Err(err) =
            sqlite::accounts::update_watermark(&ctx.pool, &account.id, connector.platform(), started_at)
        {
            warn!(account_id = %account.id, error = %err, "Failed to update sync watermark");
        }
    }

    set_phase(&mut summary, &ctx.events, AccountPhase::Done);
    summary
}

async fn sync_platform(
    ctx: &RunContext,
    account: &Account,
    connector: &dyn PlatformConnector,
    summary: &mut AccountSummary,
) -> Result<()> {
    let platform = connector.platform();

    set_phase(summary, &ctx.events, AccountPhase::Fetching);
    let fetched = fetch_platform(ctx, connector, &account.id, summary).await?;

    set_phase(summary, &ctx.events, AccountPhase::Resolving);
    let members = fetch_members(ctx, connector, &fetched).await;
    let resolved = resolve_identifiers(ctx, connector, &fetched, &members, summary).await;

    set_phase(summary, &ctx.events, AccountPhase::Merging);
    let groups = grouper::group_by_thread(fetched);
    debug!(
        account_id = %account.id,
        platform = platform.as_str(),
        groups = groups.len(),
        "Merging thread groups"
    );

    for group in &groups {
        let participants = build_participants(
            group,
            members.get(&group.platform_thread_id),
            &resolved,
            ctx.config.min_display_confidence,
        );
        let lock = ctx.locks.for_thread(&account.id, &group.platform_thread_id).await;
        let _guard = lock.lock().await;

        match merge::merge_thread_group(
            &ctx.pool,
            &account.id,
            platform,
            group,
            &resolved,
            &participants,
        ) {
            Ok(outcome) => {
                if outcome.created_conversation {
                    summary.new_conversations += 1;
                }
                summary.new_messages += outcome.new_messages;
                summary.backfilled_attachments += outcome.backfilled_attachments;
                let _ = ctx.events.send(SyncEvent::ConversationMerged {
                    account_id: account.id.clone(),
                    platform_thread_id: group.platform_thread_id.clone(),
                    new_messages: outcome.new_messages,
                });
            }
            Err(err) => {
                warn!(
                    account_id = %account.id,
                    platform_thread_id = %group.platform_thread_id,
                    error = %err,
                    "Merge failed, continuing with next conversation"
                );
                record_conversation_error(
                    summary,
                    &ctx.events,
                    &account.id,
                    &group.platform_thread_id,
                    &err,
                );
            }
        }
    }

    Ok(())
}

/// Paginate the account's conversation listing and fetch each thread's
/// messages. Auth errors abort the whole account; any other per-thread
/// failure records an error and moves on.
async fn fetch_platform(
    ctx: &RunContext,
    connector: &dyn PlatformConnector,
    account_id: &str,
    summary: &mut AccountSummary,
) -> Result<Vec<FetchedThread>> {
    let mut threads = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = with_retry(&ctx.config.retry, "list_conversations", || {
            connector.list_conversations(account_id, page_token.as_deref())
        })
        .await?;

        for listed in page.conversations {
            match fetch_thread(ctx, connector, &listed).await {
                Ok(thread) => threads.push(thread),
                Err(err @ SyncError::UpstreamAuth(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        account_id,
                        platform_thread_id = %listed.platform_thread_id,
                        error = %err,
                        "Conversation fetch failed, continuing with next"
                    );
                    record_conversation_error(
                        summary,
                        &ctx.events,
                        account_id,
                        &listed.platform_thread_id,
                        &err,
                    );
                }
            }
        }

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    debug!(account_id, slices = threads.len(), "Fetch phase finished");
    Ok(threads)
}

async fn fetch_thread(
    ctx: &RunContext,
    connector: &dyn PlatformConnector,
    listed_conversation: &RemoteConversation,
) -> Result<FetchedThread> {
    let mut messages: Vec<FetchedMessage> = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = with_retry(&ctx.config.retry, "list_messages", || {
            connector.list_messages(&listed_conversation.platform_thread_id, page_token.as_deref())
        })
        .await?;

        for listed in page.messages {
            let message = if listed.hydrated {
                listed
            } else {
                match with_retry(&ctx.config.retry, "get_message", || {
                    connector.get_message(&listed.platform_message_id)
                })
                .await
                {
                    Ok(mut full) => {
                        if full.label.is_none() {
                            full.label = listed.label.clone();
                        }
                        full
                    }
                    Err(err @ SyncError::UpstreamAuth(_)) => return Err(err),
                    Err(err) => {
                        warn!(
                            platform_message_id = %listed.platform_message_id,
                            error = %err,
                            "Skipping message that failed to hydrate"
                        );
                        continue;
                    }
                }
            };
            messages.push(offload_attachments(ctx.blobs.as_ref(), message).await);
        }

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    Ok(FetchedThread {
        conversation: listed_conversation.clone(),
        messages,
    })
}

/// Hand inline payloads to the blob store; past this point only references
/// travel. A failed store drops the bytes and leaves the download pending
/// for a later pass.
async fn offload_attachments(blobs: &dyn BlobStore, mut message: FetchedMessage) -> FetchedMessage {
    for attachment in &mut message.attachments {
        let Some(bytes) = attachment.inline_bytes.take() else {
            continue;
        };
        if attachment.blob_ref.is_some() {
            continue;
        }
        match blobs.store(&bytes).await {
            Ok(blob_ref) => attachment.blob_ref = Some(blob_ref),
            Err(err) => {
                warn!(
                    filename = attachment.filename.as_deref().unwrap_or(""),
                    error = %err,
                    "Failed to offload inline attachment payload"
                );
            }
        }
    }
    message
}

/// Space rosters, chat only. The roster is enrichment: a failed listing
/// logs and syncs without it.
async fn fetch_members(
    ctx: &RunContext,
    connector: &dyn PlatformConnector,
    threads: &[FetchedThread],
) -> HashMap<String, Vec<String>> {
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    if connector.platform() != PlatformKind::Chat {
        return members;
    }

    for thread in threads {
        let thread_id = &thread.conversation.platform_thread_id;
        if members.contains_key(thread_id) {
            continue;
        }
        match with_retry(&ctx.config.retry, "list_members", || {
            connector.list_members(thread_id)
        })
        .await
        {
            Ok(list) => {
                members.insert(thread_id.clone(), list);
            }
            Err(err) => {
                warn!(
                    platform_thread_id = %thread_id,
                    error = %err,
                    "Member listing failed, syncing without the roster"
                );
            }
        }
    }
    members
}

/// Resolve every distinct sender and roster member once, in encounter
/// order, through the run-wide cache.
async fn resolve_identifiers(
    ctx: &RunContext,
    connector: &dyn PlatformConnector,
    threads: &[FetchedThread],
    members: &HashMap<String, Vec<String>>,
    summary: &mut AccountSummary,
) -> HashMap<String, Identity> {
    let mut identifiers: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for thread in threads {
        for message in &thread.messages {
            if seen.insert(message.sender_identifier.clone()) {
                identifiers.push(message.sender_identifier.clone());
            }
        }
    }
    for list in members.values() {
        for member in list {
            if seen.insert(member.clone()) {
                identifiers.push(member.clone());
            }
        }
    }

    let mut resolved = HashMap::new();
    let mut cache = ctx.cache.lock().await;
    for identifier in identifiers {
        let identity = ctx
            .resolver
            .resolve(&mut cache, Some(connector), &identifier)
            .await;
        resolved.insert(identifier, identity);
    }
    summary.resolved_identities += resolved.len();
    resolved
}

/// Conversation roster: every distinct sender in the group, then roster
/// members who never sent anything. Identity dedup, so one person listed
/// under two spellings appears once. Display names below the confidence
/// floor are omitted; the confidence value itself is kept.
fn build_participants(
    group: &ThreadGroup,
    members: Option<&Vec<String>>,
    resolved: &HashMap<String, Identity>,
    min_display_confidence: u8,
) -> Vec<Participant> {
    let mut participants: Vec<Participant> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for message in &group.messages {
        push_participant(
            &mut participants,
            &mut seen,
            &message.sender_identifier,
            resolved,
            ParticipantRole::Sender,
            min_display_confidence,
        );
    }
    if let Some(member_ids) = members {
        for member in member_ids {
            push_participant(
                &mut participants,
                &mut seen,
                member,
                resolved,
                ParticipantRole::Member,
                min_display_confidence,
            );
        }
    }
    participants
}

fn push_participant(
    participants: &mut Vec<Participant>,
    seen: &mut HashSet<String>,
    identifier: &str,
    resolved: &HashMap<String, Identity>,
    role: ParticipantRole,
    min_display_confidence: u8,
) {
    let identity = resolved.get(identifier);
    let key = identity
        .map(|i| i.external_id.clone())
        .unwrap_or_else(|| identifier.to_string());
    if !seen.insert(key) {
        return;
    }
    participants.push(match identity {
        Some(identity) => Participant {
            identifier: identifier.to_string(),
            resolved_email: identity.email.clone(),
            display_name: identity
                .display_name
                .clone()
                .filter(|_| identity.confidence >= min_display_confidence),
            role,
            confidence: identity.confidence,
        },
        None => Participant {
            identifier: identifier.to_string(),
            resolved_email: None,
            display_name: None,
            role,
            confidence: 0,
        },
    });
}

fn set_phase(summary: &mut AccountSummary, events: &flume::Sender<SyncEvent>, phase: AccountPhase) {
    summary.phase = phase;
    debug!(account_id = %summary.account_id, phase = phase.as_str(), "Phase change");
    let _ = events.send(SyncEvent::PhaseChanged {
        account_id: summary.account_id.clone(),
        phase,
    });
}

fn record_conversation_error(
    summary: &mut AccountSummary,
    events: &flume::Sender<SyncEvent>,
    account_id: &str,
    platform_thread_id: &str,
    err: &SyncError,
) {
    // One error per conversation even when a thread is listed under
    // several labels.
    if summary
        .errors
        .iter()
        .any(|e| e.platform_thread_id == platform_thread_id)
    {
        return;
    }
    summary.errors.push(ConversationError {
        platform_thread_id: platform_thread_id.to_string(),
        error: err.to_string(),
    });
    let _ = events.send(SyncEvent::ConversationFailed {
        account_id: account_id.to_string(),
        platform_thread_id: platform_thread_id.to_string(),
        error: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{pool::create_pool, schema, DbPool};
    use crate::config::SyncConfig;
    use crate::connector::DirectoryProfile;
    use crate::services::sync::helpers::backoff::RetryPolicy;
    use crate::services::sync::testing::{message, remote, MemoryBlobs, StubPlatform};
    use crate::types::{DownloadState, FetchedAttachment};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("sync.db")).unwrap();
        schema::initialize(&pool).unwrap();
        (dir, pool)
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            account_pause_ms: 0,
            ..SyncConfig::default()
        }
    }

    fn context_with(
        pool: &DbPool,
        connectors: Vec<Arc<dyn PlatformConnector>>,
        blobs: Arc<MemoryBlobs>,
    ) -> (RunContext, flume::Receiver<SyncEvent>) {
        crate::services::sync::testing::init_test_logging();
        let (tx, rx) = flume::unbounded();
        let ctx = RunContext::new(pool.clone(), connectors, blobs, fast_config(), tx);
        (ctx, rx)
    }

    fn context(
        pool: &DbPool,
        connectors: Vec<Arc<dyn PlatformConnector>>,
    ) -> (RunContext, flume::Receiver<SyncEvent>) {
        context_with(pool, connectors, Arc::new(MemoryBlobs::new()))
    }

    fn setup_account(pool: &DbPool, id: &str) -> Account {
        sqlite::accounts::ensure_account(pool, id, None).unwrap();
        sqlite::accounts::get_account(pool, id).unwrap().unwrap()
    }

    fn phases(rx: &flume::Receiver<SyncEvent>) -> Vec<AccountPhase> {
        rx.try_iter()
            .filter_map(|event| match event {
                SyncEvent::PhaseChanged { phase, .. } => Some(phase),
                _ => None,
            })
            .collect()
    }

    fn two_label_mail_platform() -> StubPlatform {
        let m1 = message("m1", "T1", "ada@example.com", "incoming", 1_000);
        let m2 = message("m2", "T1", "grace@example.com", "outgoing", 2_000);
        StubPlatform::new(PlatformKind::Mail)
            .with_conversation_page(vec![
                remote("T1", Some("Rollout plan"), Some("incoming")),
                remote("T1", Some("Rollout plan"), Some("outgoing")),
            ])
            .with_message_pages("T1", vec![vec![m1], vec![m2]])
    }

    #[tokio::test]
    async fn two_label_listings_of_one_thread_merge_into_one_conversation() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");
        let (ctx, rx) = context(&pool, vec![Arc::new(two_label_mail_platform())]);

        let summary = run_account_sync(&ctx, &account).await;

        assert_eq!(summary.phase, AccountPhase::Done);
        assert_eq!(summary.new_conversations, 1);
        assert_eq!(summary.new_messages, 2);
        assert!(summary.errors.is_empty());
        assert!(summary.account_error.is_none());

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        assert_eq!(conversations.len(), 1);
        let conversation = &conversations[0];
        assert_eq!(conversation.platform_thread_id, "T1");
        assert_eq!(conversation.subject.as_deref(), Some("Rollout plan"));
        assert_eq!(conversation.message_count, 2);
        assert_eq!(conversation.last_activity_at, Some(2_000));
        assert_eq!(conversation.participants.len(), 2);

        let messages =
            sqlite::messages::fetch_conversation_messages(&pool, &conversation.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].platform_message_id, "m1");
        assert_eq!(messages[1].platform_message_id, "m2");
        assert_eq!(messages[0].sender_email.as_deref(), Some("ada@example.com"));
        assert_eq!(messages[0].label.as_deref(), Some("incoming"));
        assert_eq!(messages[1].label.as_deref(), Some("outgoing"));

        let refreshed = sqlite::accounts::get_account(&pool, "team@example.com").unwrap().unwrap();
        assert!(refreshed.last_mail_synced_at.is_some());
        assert!(refreshed.last_chat_synced_at.is_none());

        assert_eq!(
            phases(&rx),
            vec![
                AccountPhase::Fetching,
                AccountPhase::Resolving,
                AccountPhase::Merging,
                AccountPhase::Done,
            ]
        );
    }

    #[tokio::test]
    async fn second_pass_over_the_same_data_is_a_no_op() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");

        let (first_ctx, _rx1) = context(&pool, vec![Arc::new(two_label_mail_platform())]);
        let first = run_account_sync(&first_ctx, &account).await;
        assert_eq!(first.new_messages, 2);

        let (second_ctx, _rx2) = context(&pool, vec![Arc::new(two_label_mail_platform())]);
        let second = run_account_sync(&second_ctx, &account).await;

        assert_eq!(second.phase, AccountPhase::Done);
        assert_eq!(second.new_conversations, 0);
        assert_eq!(second.new_messages, 0);

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].message_count, 2);
    }

    #[tokio::test]
    async fn conversation_listings_paginate_until_the_token_runs_out() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");

        let platform = StubPlatform::new(PlatformKind::Mail)
            .with_conversation_page(vec![remote("T1", Some("One"), Some("incoming"))])
            .with_conversation_page(vec![
                remote("T2", Some("Two"), Some("incoming")),
                remote("T3", Some("Three"), Some("outgoing")),
            ])
            .with_message_pages("T1", vec![vec![message("m1", "T1", "ada@example.com", "incoming", 10)]])
            .with_message_pages("T2", vec![vec![message("m2", "T2", "ada@example.com", "incoming", 20)]])
            .with_message_pages("T3", vec![vec![message("m3", "T3", "ada@example.com", "outgoing", 30)]]);

        let (ctx, _rx) = context(&pool, vec![Arc::new(platform)]);
        let summary = run_account_sync(&ctx, &account).await;

        assert_eq!(summary.phase, AccountPhase::Done);
        assert!(summary.errors.is_empty());
        // Threads listed on the second page sync like those on the first.
        assert_eq!(summary.new_conversations, 3);
        assert_eq!(summary.new_messages, 3);

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        let mut thread_ids: Vec<&str> = conversations
            .iter()
            .map(|c| c.platform_thread_id.as_str())
            .collect();
        thread_ids.sort_unstable();
        assert_eq!(thread_ids, vec!["T1", "T2", "T3"]);
    }

    #[tokio::test]
    async fn one_failing_conversation_does_not_stop_its_neighbors() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");

        let platform = Arc::new(
            StubPlatform::new(PlatformKind::Mail)
                .with_conversation_page(vec![
                    remote("A", Some("A"), None),
                    remote("B", Some("B"), None),
                    remote("C", Some("C"), None),
                ])
                .with_message_pages("A", vec![vec![message("a1", "A", "ada@example.com", "incoming", 10)]])
                .with_message_pages("C", vec![vec![message("c1", "C", "ada@example.com", "incoming", 30)]])
                .with_failing_messages("B"),
        );
        let connector: Arc<dyn PlatformConnector> = platform.clone();
        let (ctx, _rx) = context(&pool, vec![connector]);

        let summary = run_account_sync(&ctx, &account).await;

        assert_eq!(summary.phase, AccountPhase::Done);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].platform_thread_id, "B");
        assert_eq!(summary.new_conversations, 2);

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        let thread_ids: Vec<&str> = conversations
            .iter()
            .map(|c| c.platform_thread_id.as_str())
            .collect();
        assert!(thread_ids.contains(&"A"));
        assert!(thread_ids.contains(&"C"));
        assert!(!thread_ids.contains(&"B"));

        // A took one listing call, C one, B its full retry budget.
        assert_eq!(platform.message_list_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn auth_failure_marks_the_account_failed() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");
        let (ctx, rx) = context(
            &pool,
            vec![Arc::new(StubPlatform::new(PlatformKind::Mail).with_auth_failure())],
        );

        let summary = run_account_sync(&ctx, &account).await;

        assert_eq!(summary.phase, AccountPhase::Failed);
        let reason = summary.account_error.unwrap();
        assert!(reason.contains("token expired"));

        let refreshed = sqlite::accounts::get_account(&pool, "team@example.com").unwrap().unwrap();
        assert!(refreshed.last_mail_synced_at.is_none());

        assert_eq!(phases(&rx), vec![AccountPhase::Fetching, AccountPhase::Failed]);
    }

    #[tokio::test]
    async fn unhydrated_messages_are_refetched_and_payloads_offloaded() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");

        let mut listed = message("m1", "T1", "ada@example.com", "incoming", 1_000);
        listed.hydrated = false;

        let mut full = message("m1", "T1", "ada@example.com", "incoming", 1_000);
        full.label = None;
        full.attachments = vec![FetchedAttachment {
            source_ref: Some("att-1".to_string()),
            resource_name: None,
            filename: Some("notes.txt".to_string()),
            mime_type: Some("text/plain".to_string()),
            size_bytes: Some(5),
            blob_ref: None,
            inline_bytes: Some(b"hello".to_vec()),
        }];

        let platform = StubPlatform::new(PlatformKind::Mail)
            .with_conversation_page(vec![remote("T1", Some("Notes"), Some("incoming"))])
            .with_message_pages("T1", vec![vec![listed]])
            .with_full_message(full);

        let blobs = Arc::new(MemoryBlobs::new());
        let (ctx, _rx) = context_with(&pool, vec![Arc::new(platform)], blobs.clone());

        let summary = run_account_sync(&ctx, &account).await;
        assert_eq!(summary.phase, AccountPhase::Done);
        assert_eq!(summary.new_messages, 1);
        assert_eq!(blobs.stored_count(), 1);

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        let messages =
            sqlite::messages::fetch_conversation_messages(&pool, &conversations[0].id).unwrap();
        assert_eq!(messages[0].label.as_deref(), Some("incoming"));
        let attachment = &messages[0].attachments[0];
        assert_eq!(attachment.dedup_key, "att-1");
        assert_eq!(attachment.blob_ref.as_deref(), Some("blob-1"));
        assert_eq!(attachment.download_state, DownloadState::Stored);
    }

    #[tokio::test]
    async fn chat_rosters_become_participants() {
        let (_dir, pool) = test_pool();
        let account = setup_account(&pool, "team@example.com");

        let platform = StubPlatform::new(PlatformKind::Chat)
            .with_conversation_page(vec![remote("spaces/S1", Some("Standup"), None)])
            .with_message_pages(
                "spaces/S1",
                vec![vec![message("c1", "spaces/S1", "users/1", "space", 1_000)]],
            )
            .with_members("spaces/S1", &["users/1", "users/2", "users/3"])
            .with_profile(
                "users/1",
                DirectoryProfile {
                    email: "ada@example.com".to_string(),
                    display_name: Some("Ada Lovelace".to_string()),
                    domain: None,
                },
            )
            .with_profile(
                "users/2",
                DirectoryProfile {
                    email: "grace@example.com".to_string(),
                    display_name: Some("Grace Hopper".to_string()),
                    domain: None,
                },
            );

        let (ctx, _rx) = context(&pool, vec![Arc::new(platform)]);
        let summary = run_account_sync(&ctx, &account).await;

        assert_eq!(summary.phase, AccountPhase::Done);
        assert_eq!(summary.resolved_identities, 3);

        let conversations =
            sqlite::conversations::list_conversations(&pool, "team@example.com").unwrap();
        let participants = &conversations[0].participants;
        assert_eq!(participants.len(), 3);
        assert_eq!(participants[0].identifier, "users/1");
        assert_eq!(participants[0].role, ParticipantRole::Sender);
        assert_eq!(participants[0].resolved_email.as_deref(), Some("ada@example.com"));
        assert_eq!(participants[0].confidence, 100);
        assert_eq!(participants[1].identifier, "users/2");
        assert_eq!(participants[1].role, ParticipantRole::Member);
        assert_eq!(participants[1].display_name.as_deref(), Some("Grace Hopper"));

        // users/3 has no directory profile; the placeholder keeps the
        // confidence signal but its synthetic name stays off the roster.
        assert_eq!(participants[2].identifier, "users/3");
        assert_eq!(participants[2].confidence, 25);
        assert!(participants[2].display_name.is_none());
        let placeholder = participants[2].resolved_email.as_deref().unwrap();
        assert!(placeholder.starts_with("unknown-"));
        assert!(placeholder.ends_with("@unresolved.invalid"));

        let refreshed = sqlite::accounts::get_account(&pool, "team@example.com").unwrap().unwrap();
        assert!(refreshed.last_chat_synced_at.is_some());
        assert!(refreshed.last_mail_synced_at.is_none());
    }
}
