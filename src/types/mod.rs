pub mod identity;

use serde::{Deserialize, Serialize};

/// Which upstream platform a conversation or message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Mail,
    Chat,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Mail => "mail",
            PlatformKind::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mail" => Some(PlatformKind::Mail),
            "chat" => Some(PlatformKind::Chat),
            _ => None,
        }
    }
}

/// An account under sync, with per-platform watermarks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub last_mail_synced_at: Option<i64>,
    pub last_chat_synced_at: Option<i64>,
    pub created_at: i64,
}

/// A conversation participant with its resolved profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub identifier: String,
    pub resolved_email: Option<String>,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    #[serde(default)]
    pub confidence: u8,
}

impl Participant {
    /// Display name, suppressed below the caller's confidence floor.
    /// Placeholder names are a heuristic, not a real identity.
    pub fn visible_name(&self, min_confidence: u8) -> Option<&str> {
        if self.confidence >= min_confidence {
            self.display_name.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Sender,
    Member,
}

/// Canonical grouping of all messages sharing one platform thread/space id.
/// Unique per (account_id, platform_thread_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub platform: PlatformKind,
    pub platform_thread_id: String,
    pub subject: Option<String>,
    pub participants: Vec<Participant>,
    pub message_count: i64,
    pub last_activity_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted message. Immutable after insert except the attachments
/// column, which the reconciler may backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
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
    pub fetched_at: i64,
}

/// Download lifecycle of an attachment's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Pending,
    Stored,
    Failed,
}

/// A persisted attachment reference. The core never holds bytes; blob_ref
/// points into the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub dedup_key: String,
    /// Synthesized keys are random and cannot match across sync passes.
    #[serde(default)]
    pub synthesized_key: bool,
    pub source_ref: Option<String>,
    pub resource_name: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub media_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub download_state: DownloadState,
    pub blob_ref: Option<String>,
}

/// A conversation as listed by a platform connector, before grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConversation {
    pub platform_thread_id: String,
    pub subject: Option<String>,
    /// Fetch label this listing came from (e.g. "incoming", "outgoing").
    /// The same thread may be listed under several labels.
    pub label: Option<String>,
}

/// A message as fetched from a platform connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub platform_message_id: String,
    pub platform_thread_id: String,
    pub sender_identifier: String,
    pub body_text: Option<String>,
    pub label: Option<String>,
    pub created_at: i64,
    pub attachments: Vec<FetchedAttachment>,
    /// List endpoints may omit attachment detail; false means the
    /// orchestrator must re-fetch via get_message before merging.
    pub hydrated: bool,
}

/// An attachment as fetched, before key selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedAttachment {
    pub source_ref: Option<String>,
    pub resource_name: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    /// Blob reference. Connectors may set it when the platform exposes a
    /// stable storage ref; the core sets it when offloading inline bytes.
    #[serde(default)]
    pub blob_ref: Option<String>,
    /// Small inline payloads some connectors return. Offloaded to the
    /// blob store before grouping; never serialized or persisted.
    #[serde(skip)]
    pub inline_bytes: Option<Vec<u8>>,
}
