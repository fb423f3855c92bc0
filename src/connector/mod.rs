//! Platform connector boundary
//!
//! The sync core is protocol-agnostic: it consumes whatever a connector
//! implements, one per upstream platform. Connectors wrap the raw list/get
//! calls and pagination tokens of their platform; the core never sees HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{FetchedMessage, PlatformKind, RemoteConversation};

/// One page of a conversation listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<RemoteConversation>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One page of a message listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<FetchedMessage>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Canonical profile returned by the platform's directory service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryProfile {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Access to one upstream platform for one or more accounts.
///
/// Implementations live outside this crate. Errors use the shared taxonomy:
/// transient failures are retried by the orchestrator, auth failures abort
/// the account, shape failures skip a message.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Which platform this connector serves
    fn platform(&self) -> PlatformKind;

    /// List conversations visible to an account, one page at a time
    async fn list_conversations(
        &self,
        account_id: &str,
        page_token: Option<&str>,
    ) -> Result<ConversationPage>;

    /// List messages of one conversation, one page at a time
    async fn list_messages(
        &self,
        platform_thread_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetch one fully hydrated message. List responses may omit
    /// attachment detail; this call never does.
    async fn get_message(&self, platform_message_id: &str) -> Result<FetchedMessage>;

    /// Participant identifiers of a conversation
    async fn list_members(&self, platform_thread_id: &str) -> Result<Vec<String>>;

    /// Directory lookup for an opaque identifier. `Ok(None)` means the
    /// directory has no profile; errors are treated by the resolver as
    /// cascade continuation, not failure.
    async fn resolve_directory_profile(&self, identifier: &str)
        -> Result<Option<DirectoryProfile>>;
}

/// Opaque byte sink for attachment payloads. The core stores bytes it
/// happens to receive inline and keeps only the returned reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(&self, bytes: &[u8]) -> Result<String>;
}
