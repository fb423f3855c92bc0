//! Attachment reconciliation.
//!
//! Merges the attachment list of a stored message with freshly fetched
//! data. Stored entries are never removed and populated fields are never
//! overwritten; a re-fetch can only fill gaps (size, blob reference) and
//! append genuinely new attachments.

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{AttachmentRecord, DownloadState, FetchedAttachment};

/// Dedup key for one attachment, with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub value: String,
    /// Synthesized keys are random: they identify the record locally but
    /// can never match the same file fetched in a later pass.
    pub synthesized: bool,
}

/// Select the dedup key, first non-empty candidate wins:
/// explicit source reference, provider resource name, filename plus
/// content type, then a synthesized random key.
pub fn dedup_key(attachment: &FetchedAttachment) -> DedupKey {
    if let Some(source_ref) = non_empty(attachment.source_ref.as_deref()) {
        return DedupKey {
            value: source_ref.to_string(),
            synthesized: false,
        };
    }
    if let Some(resource_name) = non_empty(attachment.resource_name.as_deref()) {
        return DedupKey {
            value: resource_name.to_string(),
            synthesized: false,
        };
    }
    if let (Some(filename), Some(mime_type)) = (
        non_empty(attachment.filename.as_deref()),
        non_empty(attachment.mime_type.as_deref()),
    ) {
        return DedupKey {
            value: format!("{}/{}", filename, mime_type),
            synthesized: false,
        };
    }
    DedupKey {
        value: Uuid::new_v4().to_string(),
        synthesized: true,
    }
}

/// Coarse media kind from a mime type.
pub fn media_kind_for_mime(mime_type: Option<&str>) -> Option<String> {
    let mime = non_empty(mime_type)?;
    let kind = if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else {
        "file"
    };
    Some(kind.to_string())
}

/// Build the persistable record for a fetched attachment. A present
/// blob_ref (offloaded inline bytes or a connector-provided ref) marks the
/// record Stored.
pub fn to_record(attachment: &FetchedAttachment) -> AttachmentRecord {
    let key = dedup_key(attachment);
    let download_state = if attachment.blob_ref.is_some() {
        DownloadState::Stored
    } else {
        DownloadState::Pending
    };
    AttachmentRecord {
        dedup_key: key.value,
        synthesized_key: key.synthesized,
        source_ref: attachment.source_ref.clone(),
        resource_name: attachment.resource_name.clone(),
        filename: attachment.filename.clone(),
        mime_type: attachment.mime_type.clone(),
        media_type: media_kind_for_mime(attachment.mime_type.as_deref()),
        size_bytes: attachment.size_bytes,
        download_state,
        blob_ref: attachment.blob_ref.clone(),
    }
}

/// Merge incoming attachments into the stored list.
///
/// Returns the merged list and how many stored entries were backfilled in
/// place. Synthesized keys stay out of the match index, so anonymous
/// attachments from a later pass append rather than falsely matching.
pub fn merge_attachment_lists(
    existing: &[AttachmentRecord],
    incoming: &[AttachmentRecord],
) -> (Vec<AttachmentRecord>, usize) {
    let mut merged: Vec<AttachmentRecord> = existing.to_vec();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (position, attachment) in existing.iter().enumerate() {
        if !attachment.synthesized_key {
            index.entry(attachment.dedup_key.clone()).or_insert(position);
        }
    }

    let mut backfilled = 0;
    for attachment in incoming {
        match index.get(&attachment.dedup_key) {
            Some(&position) => {
                if fill_missing(&mut merged[position], attachment) {
                    backfilled += 1;
                }
            }
            None => {
                if !attachment.synthesized_key {
                    index.insert(attachment.dedup_key.clone(), merged.len());
                }
                merged.push(attachment.clone());
            }
        }
    }

    (merged, backfilled)
}

/// Fill only fields the stored record is missing. Never overwrites.
fn fill_missing(target: &mut AttachmentRecord, source: &AttachmentRecord) -> bool {
    let mut changed = false;

    if target.source_ref.is_none() && source.source_ref.is_some() {
        target.source_ref = source.source_ref.clone();
        changed = true;
    }
    if target.resource_name.is_none() && source.resource_name.is_some() {
        target.resource_name = source.resource_name.clone();
        changed = true;
    }
    if target.filename.is_none() && source.filename.is_some() {
        target.filename = source.filename.clone();
        changed = true;
    }
    if target.mime_type.is_none() && source.mime_type.is_some() {
        target.mime_type = source.mime_type.clone();
        changed = true;
    }
    if target.media_type.is_none() && source.media_type.is_some() {
        target.media_type = source.media_type.clone();
        changed = true;
    }
    if target.size_bytes.is_none() && source.size_bytes.is_some() {
        target.size_bytes = source.size_bytes;
        changed = true;
    }
    if target.blob_ref.is_none() && source.blob_ref.is_some() {
        target.blob_ref = source.blob_ref.clone();
        if target.download_state == DownloadState::Pending {
            target.download_state = DownloadState::Stored;
        }
        changed = true;
    }

    changed
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(
        source_ref: Option<&str>,
        resource_name: Option<&str>,
        filename: Option<&str>,
        mime_type: Option<&str>,
    ) -> FetchedAttachment {
        FetchedAttachment {
            source_ref: source_ref.map(String::from),
            resource_name: resource_name.map(String::from),
            filename: filename.map(String::from),
            mime_type: mime_type.map(String::from),
            size_bytes: None,
            blob_ref: None,
            inline_bytes: None,
        }
    }

    #[test]
    fn key_priority_is_source_then_resource_then_composite() {
        let all = fetched(Some("src-1"), Some("res-1"), Some("a.png"), Some("image/png"));
        assert_eq!(dedup_key(&all).value, "src-1");

        let no_source = fetched(None, Some("res-1"), Some("a.png"), Some("image/png"));
        assert_eq!(dedup_key(&no_source).value, "res-1");

        let composite = fetched(None, None, Some("a.png"), Some("image/png"));
        let key = dedup_key(&composite);
        assert_eq!(key.value, "a.png/image/png");
        assert!(!key.synthesized);
    }

    #[test]
    fn blank_candidates_are_skipped() {
        let blank_refs = fetched(Some("  "), Some(""), Some("a.png"), Some("image/png"));
        assert_eq!(dedup_key(&blank_refs).value, "a.png/image/png");
    }

    #[test]
    fn anonymous_attachment_gets_a_synthesized_key() {
        let anonymous = fetched(None, None, None, None);
        let first = dedup_key(&anonymous);
        let second = dedup_key(&anonymous);
        assert!(first.synthesized);
        // random by design: a later pass cannot dedup these
        assert_ne!(first.value, second.value);
    }

    #[test]
    fn matching_key_backfills_in_place_without_overwriting() {
        let stored = AttachmentRecord {
            dedup_key: "src-1".into(),
            synthesized_key: false,
            source_ref: Some("src-1".into()),
            resource_name: None,
            filename: Some("report.pdf".into()),
            mime_type: Some("application/pdf".into()),
            media_type: Some("file".into()),
            size_bytes: None,
            download_state: DownloadState::Pending,
            blob_ref: None,
        };
        let incoming = AttachmentRecord {
            filename: Some("renamed.pdf".into()),
            size_bytes: Some(4096),
            blob_ref: Some("blob://abc".into()),
            download_state: DownloadState::Stored,
            resource_name: Some("res-9".into()),
            ..stored.clone()
        };

        let (merged, backfilled) = merge_attachment_lists(&[stored], &[incoming]);
        assert_eq!(merged.len(), 1);
        assert_eq!(backfilled, 1);
        // populated field kept, empty ones filled
        assert_eq!(merged[0].filename.as_deref(), Some("report.pdf"));
        assert_eq!(merged[0].size_bytes, Some(4096));
        assert_eq!(merged[0].blob_ref.as_deref(), Some("blob://abc"));
        assert_eq!(merged[0].resource_name.as_deref(), Some("res-9"));
        assert_eq!(merged[0].download_state, DownloadState::Stored);
    }

    #[test]
    fn existing_entries_survive_and_new_ones_append_in_order() {
        let keep = to_record(&fetched(Some("src-old"), None, None, None));
        let first_new = to_record(&fetched(Some("src-a"), None, None, None));
        let second_new = to_record(&fetched(Some("src-b"), None, None, None));

        let (merged, backfilled) =
            merge_attachment_lists(&[keep.clone()], &[first_new.clone(), second_new.clone()]);
        assert_eq!(backfilled, 0);
        let keys: Vec<&str> = merged.iter().map(|a| a.dedup_key.as_str()).collect();
        assert_eq!(keys, vec!["src-old", "src-a", "src-b"]);
    }

    #[test]
    fn duplicate_key_within_one_batch_appends_once() {
        let incoming_a = to_record(&fetched(Some("src-1"), None, Some("a.png"), None));
        let incoming_b = to_record(&fetched(Some("src-1"), None, Some("a.png"), Some("image/png")));

        let (merged, _) = merge_attachment_lists(&[], &[incoming_a, incoming_b]);
        assert_eq!(merged.len(), 1);
        // the second occurrence still backfilled the first
        assert_eq!(merged[0].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn synthesized_keys_never_match_across_passes() {
        let pass_one = to_record(&fetched(None, None, None, None));
        let pass_two = to_record(&fetched(None, None, None, None));

        let (merged, backfilled) = merge_attachment_lists(&[pass_one], &[pass_two]);
        // documented limitation: anonymous attachments cannot be deduped later
        assert_eq!(merged.len(), 2);
        assert_eq!(backfilled, 0);
    }

    #[test]
    fn media_kind_buckets() {
        assert_eq!(media_kind_for_mime(Some("image/png")).as_deref(), Some("image"));
        assert_eq!(media_kind_for_mime(Some("video/mp4")).as_deref(), Some("video"));
        assert_eq!(media_kind_for_mime(Some("audio/ogg")).as_deref(), Some("audio"));
        assert_eq!(
            media_kind_for_mime(Some("application/pdf")).as_deref(),
            Some("file")
        );
        assert_eq!(media_kind_for_mime(None), None);
    }
}
