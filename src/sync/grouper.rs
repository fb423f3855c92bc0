//! Conversation grouping by platform thread id.
//!
//! Upstream listings are split by fetch label (a mail thread shows up under
//! both "incoming" and "outgoing"), so the same thread arrives in several
//! slices. Grouping runs before any persistence and folds every slice into
//! one group per thread id; the store never sees a per-label view, which is
//! what used to produce duplicate conversations for a single thread.

use std::collections::{HashMap, HashSet};

use crate::types::{FetchedMessage, RemoteConversation};

/// One upstream listing slice with the messages fetched under it.
#[derive(Debug, Clone)]
pub struct FetchedThread {
    pub conversation: RemoteConversation,
    pub messages: Vec<FetchedMessage>,
}

/// All fetched messages of one platform thread, across labels.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    pub platform_thread_id: String,
    pub subject: Option<String>,
    pub messages: Vec<FetchedMessage>,
}

/// Group fetched slices into one ThreadGroup per platform thread id.
///
/// A message seen under several labels is kept once (first occurrence wins).
/// Messages inside a group are ordered by creation time, ties broken by
/// platform message id; groups are ordered by earliest message, then thread
/// id, so repeated runs process identical input identically.
pub fn group_by_thread(fetched: Vec<FetchedThread>) -> Vec<ThreadGroup> {
    let mut subjects: HashMap<String, String> = HashMap::new();
    let mut groups: HashMap<String, Vec<FetchedMessage>> = HashMap::new();
    let mut seen_ids: HashMap<String, HashSet<String>> = HashMap::new();

    for slice in fetched {
        if let Some(subject) = slice.conversation.subject.as_deref() {
            if !subject.is_empty() {
                subjects
                    .entry(slice.conversation.platform_thread_id.clone())
                    .or_insert_with(|| subject.to_string());
            }
        }

        for message in slice.messages {
            // The message's own thread id is authoritative, not the
            // listing it happened to arrive under.
            let thread_id = message.platform_thread_id.clone();
            let seen = seen_ids.entry(thread_id.clone()).or_default();
            if !seen.insert(message.platform_message_id.clone()) {
                continue;
            }
            groups.entry(thread_id).or_default().push(message);
        }
    }

    let mut result: Vec<ThreadGroup> = groups
        .into_iter()
        .map(|(platform_thread_id, mut messages)| {
            messages.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.platform_message_id.cmp(&b.platform_message_id))
            });
            let subject = subjects.remove(&platform_thread_id);
            ThreadGroup {
                platform_thread_id,
                subject,
                messages,
            }
        })
        .collect();

    result.sort_by(|a, b| {
        let a_first = a.messages.first().map(|m| m.created_at).unwrap_or(i64::MAX);
        let b_first = b.messages.first().map(|m| m.created_at).unwrap_or(i64::MAX);
        a_first
            .cmp(&b_first)
            .then_with(|| a.platform_thread_id.cmp(&b.platform_thread_id))
    });
    result
}
