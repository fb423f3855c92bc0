//! Run-level orchestration.
//!
//! `run_sync` drives one pass over every registered account. Accounts run
//! sequentially by default or under a small bounded pool, with a pause
//! between account starts to respect upstream rate limits. One account's
//! failure never touches its siblings; every account's outcome lands in the
//! run summary regardless.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::adapters::sqlite::{accounts, DbPool};
use crate::config::SyncConfig;
use crate::connector::{BlobStore, PlatformConnector};
use crate::error::Result;
use crate::services::sync::tasks::run_account_sync;
use crate::services::sync::{
    AccountPhase, AccountSummary, RunContext, RunSummary, SyncEvent,
};

/// Sync every registered account once.
///
/// `events` is optional; `None` disables progress emission. The returned
/// summary lists accounts in registration order. Errors surface only when
/// the run cannot start at all (the account registry is unreadable);
/// per-account failures are captured in their summaries instead.
pub async fn run_sync(
    pool: DbPool,
    connectors: Vec<Arc<dyn PlatformConnector>>,
    blobs: Arc<dyn BlobStore>,
    config: SyncConfig,
    events: Option<flume::Sender<SyncEvent>>,
) -> Result<RunSummary> {
    let started_at = chrono::Utc::now().timestamp_millis();
    // A sender with no receiver makes every send a no-op, which is exactly
    // the disabled behavior.
    let events = events.unwrap_or_else(|| flume::unbounded().0);

    let registered = accounts::list_accounts(&pool)?;
    info!(accounts = registered.len(), "Sync run started");
    let _ = events.send(SyncEvent::RunStarted {
        accounts: registered.len(),
    });

    let ctx = Arc::new(RunContext::new(pool, connectors, blobs, config, events.clone()));
    let summaries = if ctx.config.max_account_concurrency > 1 {
        run_pooled(&ctx, registered).await
    } else {
        run_sequential(&ctx, registered).await
    };

    let summary = RunSummary {
        started_at,
        finished_at: chrono::Utc::now().timestamp_millis(),
        accounts: summaries,
    };
    info!(
        accounts = summary.accounts.len(),
        new_conversations = summary.total_new_conversations(),
        new_messages = summary.total_new_messages(),
        "Sync run finished"
    );
    let _ = events.send(SyncEvent::RunFinished {
        total_new_messages: summary.total_new_messages(),
    });
    Ok(summary)
}

async fn run_sequential(
    ctx: &Arc<RunContext>,
    registered: Vec<crate::types::Account>,
) -> Vec<AccountSummary> {
    let mut summaries = Vec::with_capacity(registered.len());
    for (index, account) in registered.iter().enumerate() {
        pause_between_starts(ctx, index).await;
        let summary = run_account_sync(ctx, account).await;
        finish_account(ctx, &summary);
        summaries.push(summary);
    }
    summaries
}

/// Bounded pool: at most `max_account_concurrency` accounts in flight.
/// Starts stay paced by the configured pause; results keep registration
/// order. A panicked task is recorded as that account's failure.
async fn run_pooled(
    ctx: &Arc<RunContext>,
    registered: Vec<crate::types::Account>,
) -> Vec<AccountSummary> {
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_account_concurrency));
    let mut handles = Vec::with_capacity(registered.len());

    for (index, account) in registered.into_iter().enumerate() {
        pause_between_starts(ctx, index).await;
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        let account_id = account.id.clone();
        let handle = tokio::spawn(async move {
            // The semaphore is never closed, so acquisition cannot fail.
            let _permit = semaphore.acquire_owned().await.ok();
            let summary = run_account_sync(&ctx, &account).await;
            finish_account(&ctx, &summary);
            summary
        });
        handles.push((account_id, handle));
    }

    let mut summaries = Vec::with_capacity(handles.len());
    for (account_id, handle) in handles {
        match handle.await {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                error!(account_id = %account_id, error = %err, "Account sync task panicked");
                let mut summary = AccountSummary::new(&account_id);
                summary.phase = AccountPhase::Failed;
                summary.account_error = Some(format!("sync task panicked: {}", err));
                finish_account(ctx, &summary);
                summaries.push(summary);
            }
        }
    }
    summaries
}

async fn pause_between_starts(ctx: &RunContext, index: usize) {
    if index > 0 && ctx.config.account_pause_ms > 0 {
        sleep(Duration::from_millis(ctx.config.account_pause_ms)).await;
    }
}

fn finish_account(ctx: &RunContext, summary: &AccountSummary) {
    info!(
        account_id = %summary.account_id,
        phase = summary.phase.as_str(),
        new_conversations = summary.new_conversations,
        new_messages = summary.new_messages,
        errors = summary.errors.len(),
        "Account sync finished"
    );
    let _ = ctx.events.send(SyncEvent::AccountFinished {
        account_id: summary.account_id.clone(),
        phase: summary.phase,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{conversations, pool::create_pool, schema};
    use crate::services::sync::helpers::backoff::RetryPolicy;
    use crate::services::sync::testing::{message, remote, MemoryBlobs, StubPlatform};
    use crate::types::PlatformKind;

    fn test_pool() -> (tempfile::TempDir, DbPool) {
        crate::services::sync::testing::init_test_logging();
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

    fn mail_platform_for(thread_id: &str) -> StubPlatform {
        StubPlatform::new(PlatformKind::Mail)
            .with_conversation_page(vec![remote(thread_id, Some("Subject"), Some("incoming"))])
            .with_message_pages(
                thread_id,
                vec![vec![message("m1", thread_id, "ada@example.com", "incoming", 1_000)]],
            )
    }

    #[tokio::test]
    async fn all_registered_accounts_sync_in_registration_order() {
        let (_dir, pool) = test_pool();
        accounts::ensure_account(&pool, "first@example.com", None).unwrap();
        accounts::ensure_account(&pool, "second@example.com", None).unwrap();

        let summary = run_sync(
            pool.clone(),
            vec![Arc::new(mail_platform_for("T1"))],
            Arc::new(MemoryBlobs::new()),
            fast_config(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.accounts.len(), 2);
        assert_eq!(summary.accounts[0].account_id, "first@example.com");
        assert_eq!(summary.accounts[1].account_id, "second@example.com");
        assert!(summary
            .accounts
            .iter()
            .all(|a| a.phase == AccountPhase::Done));
        // Each account owns its copy of the thread.
        assert_eq!(summary.total_new_conversations(), 2);
        assert_eq!(summary.total_new_messages(), 2);
        assert!(summary.finished_at >= summary.started_at);
    }

    #[tokio::test]
    async fn one_account_auth_failure_does_not_reach_its_siblings() {
        let (_dir, pool) = test_pool();
        accounts::ensure_account(&pool, "good@example.com", None).unwrap();
        accounts::ensure_account(&pool, "locked@example.com", None).unwrap();

        let platform = mail_platform_for("T1").with_auth_failure_for("locked@example.com");
        let summary = run_sync(
            pool.clone(),
            vec![Arc::new(platform)],
            Arc::new(MemoryBlobs::new()),
            fast_config(),
            None,
        )
        .await
        .unwrap();

        let good = &summary.accounts[0];
        assert_eq!(good.phase, AccountPhase::Done);
        assert_eq!(good.new_messages, 1);
        assert!(good.account_error.is_none());

        let locked = &summary.accounts[1];
        assert_eq!(locked.phase, AccountPhase::Failed);
        assert!(locked.account_error.as_deref().unwrap().contains("token expired"));

        let good_conversations =
            conversations::list_conversations(&pool, "good@example.com").unwrap();
        assert_eq!(good_conversations.len(), 1);
        let locked_conversations =
            conversations::list_conversations(&pool, "locked@example.com").unwrap();
        assert!(locked_conversations.is_empty());
    }

    #[tokio::test]
    async fn events_bracket_the_run() {
        let (_dir, pool) = test_pool();
        accounts::ensure_account(&pool, "team@example.com", None).unwrap();

        let (tx, rx) = flume::unbounded();
        run_sync(
            pool,
            vec![Arc::new(mail_platform_for("T1"))],
            Arc::new(MemoryBlobs::new()),
            fast_config(),
            Some(tx),
        )
        .await
        .unwrap();

        let events: Vec<SyncEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(SyncEvent::RunStarted { accounts: 1 })));
        assert!(matches!(
            events.last(),
            Some(SyncEvent::RunFinished { total_new_messages: 1 })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::AccountFinished { phase: AccountPhase::Done, .. }
        )));
    }

    #[tokio::test]
    async fn bounded_pool_yields_the_same_outcome_as_sequential() {
        let (_dir, pool) = test_pool();
        accounts::ensure_account(&pool, "first@example.com", None).unwrap();
        accounts::ensure_account(&pool, "second@example.com", None).unwrap();
        accounts::ensure_account(&pool, "third@example.com", None).unwrap();

        let config = SyncConfig {
            max_account_concurrency: 2,
            ..fast_config()
        };
        let summary = run_sync(
            pool.clone(),
            vec![Arc::new(mail_platform_for("T1"))],
            Arc::new(MemoryBlobs::new()),
            config,
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.accounts.len(), 3);
        assert_eq!(summary.accounts[0].account_id, "first@example.com");
        assert_eq!(summary.accounts[2].account_id, "third@example.com");
        assert!(summary.accounts.iter().all(|a| a.phase == AccountPhase::Done));
        assert_eq!(summary.total_new_messages(), 3);
    }

    #[tokio::test]
    async fn an_empty_registry_finishes_cleanly() {
        let (_dir, pool) = test_pool();
        let summary = run_sync(
            pool,
            vec![Arc::new(mail_platform_for("T1"))],
            Arc::new(MemoryBlobs::new()),
            fast_config(),
            None,
        )
        .await
        .unwrap();
        assert!(summary.accounts.is_empty());
        assert_eq!(summary.total_new_messages(), 0);
    }
}
