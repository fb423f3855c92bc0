//! Identity resolution cascade.
//!
//! `resolve` turns an opaque sender or member identifier into an identity,
//! trying in order: the per-run cache, the persistent mapping store (by
//! canonical form or recorded alias), direct synthesis for email-shaped
//! identifiers, the platform directory service, and finally a deterministic
//! placeholder. Resolution never fails; the placeholder step always
//! produces a value.
//!
//! Every non-cache-hit resolution is written back to the store off the hot
//! path: the write runs in a spawned task and the caller gets its identity
//! immediately. The store upsert ratchets confidence upward, so concurrent
//! or out-of-order writes cannot downgrade a profile.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::adapters::sqlite::identities::{self, NewIdentityMapping};
use crate::adapters::sqlite::DbPool;
use crate::config::ResolutionDepth;
use crate::connector::PlatformConnector;
use crate::services::sync::helpers::email_normalization::{
    alias_candidates, canonical_identifier, parse_name_addr,
};
use crate::types::identity::{
    domain_of, Identity, Provenance, CONFIDENCE_DIRECTORY, CONFIDENCE_DIRECTORY_COMPLETE,
    CONFIDENCE_EMAIL_DIRECT, CONFIDENCE_PLACEHOLDER,
};

/// Resolution cache scoped to one sync run. Owned by the run and passed
/// explicitly; dropped when the run ends.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: HashMap<String, Identity>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct identifiers resolved so far in this run.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, canonical: &str) -> Option<&Identity> {
        self.entries.get(canonical)
    }

    fn insert(&mut self, canonical: String, identity: Identity) {
        self.entries.insert(canonical, identity);
    }
}

pub struct IdentityResolver {
    pool: DbPool,
    depth: ResolutionDepth,
}

impl IdentityResolver {
    pub fn new(pool: DbPool, depth: ResolutionDepth) -> Self {
        Self { pool, depth }
    }

    /// Resolve one identifier. `directory` is the connector used for the
    /// directory step; `None` (or a `StoreOnly` depth) skips that step.
    pub async fn resolve(
        &self,
        cache: &mut RunCache,
        directory: Option<&dyn PlatformConnector>,
        identifier: &str,
    ) -> Identity {
        let canonical = canonical_identifier(identifier);
        if let Some(hit) = cache.get(&canonical) {
            return hit.clone();
        }

        let identity = self.resolve_uncached(directory, identifier, &canonical).await;
        cache.insert(canonical, identity.clone());
        identity
    }

    async fn resolve_uncached(
        &self,
        directory: Option<&dyn PlatformConnector>,
        identifier: &str,
        canonical: &str,
    ) -> Identity {
        if let Some(identity) = self.lookup_store(identifier, canonical) {
            return identity;
        }

        if let Some(parsed) = parse_name_addr(identifier) {
            let identity = Identity {
                external_id: canonical.to_string(),
                email: Some(parsed.email.clone()),
                display_name: parsed.display_name,
                domain: domain_of(&parsed.email),
                confidence: CONFIDENCE_EMAIL_DIRECT,
                provenance: Provenance::Email,
            };
            self.persist(identifier, &identity);
            return identity;
        }

        if self.depth == ResolutionDepth::Directory {
            if let Some(connector) = directory {
                match connector.resolve_directory_profile(canonical).await {
                    Ok(Some(profile)) => {
                        let email = profile.email.trim().to_lowercase();
                        let confidence = if profile.display_name.is_some() {
                            CONFIDENCE_DIRECTORY_COMPLETE
                        } else {
                            CONFIDENCE_DIRECTORY
                        };
                        let identity = Identity {
                            external_id: canonical.to_string(),
                            domain: profile.domain.or_else(|| domain_of(&email)),
                            email: if email.is_empty() { None } else { Some(email) },
                            display_name: profile.display_name,
                            confidence,
                            provenance: Provenance::Directory,
                        };
                        self.persist(identifier, &identity);
                        return identity;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(
                            identifier = %canonical,
                            error = %err,
                            "Directory lookup failed, continuing cascade"
                        );
                    }
                }
            }
        }

        let identity = placeholder_identity(canonical);
        self.persist(identifier, &identity);
        identity
    }

    /// Store lookup by canonical form first, then by each alias candidate.
    /// Placeholder rows do not satisfy the lookup: returning them would pin
    /// an identifier to its fallback forever, and the later cascade steps
    /// regenerate the same placeholder anyway.
    fn lookup_store(&self, identifier: &str, canonical: &str) -> Option<Identity> {
        let mut keys = vec![canonical.to_string()];
        keys.extend(alias_candidates(identifier));

        for key in &keys {
            match identities::find_identity_mapping(&self.pool, key) {
                Ok(Some(mapping)) if mapping.provenance != Provenance::Placeholder => {
                    let identity = mapping.to_identity();
                    let mut aliases = keys.clone();
                    aliases.retain(|alias| alias != &mapping.external_id);
                    self.spawn_persist(
                        NewIdentityMapping {
                            external_id: mapping.external_id,
                            email: mapping.email,
                            display_name: mapping.display_name,
                            domain: mapping.domain,
                            confidence: mapping.confidence,
                            provenance: mapping.provenance,
                            seen_at: chrono::Utc::now().timestamp_millis(),
                        },
                        aliases,
                    );
                    return Some(identity);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        key = %key,
                        error = %err,
                        "Identity store lookup failed, continuing cascade"
                    );
                }
            }
        }
        None
    }

    fn persist(&self, identifier: &str, identity: &Identity) {
        self.spawn_persist(
            NewIdentityMapping {
                external_id: identity.external_id.clone(),
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
                domain: identity.domain.clone(),
                confidence: identity.confidence,
                provenance: identity.provenance,
                seen_at: chrono::Utc::now().timestamp_millis(),
            },
            alias_candidates(identifier),
        );
    }

    /// Fire-and-forget write-back. The resolved identity is already in the
    /// caller's hands; a failed write costs a re-resolution later, nothing
    /// more.
    fn spawn_persist(&self, record: NewIdentityMapping, aliases: Vec<String>) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(err) = identities::upsert_identity_mapping(&pool, &record, &aliases) {
                warn!(
                    external_id = %record.external_id,
                    error = %err,
                    "Failed to persist identity mapping"
                );
            }
        });
    }
}

/// Deterministic fallback: the same identifier digests to the same
/// placeholder on every run, so repeated syncs stay idempotent even for
/// senders nothing can resolve.
fn placeholder_identity(canonical: &str) -> Identity {
    let digest = format!("{:x}", Sha256::digest(canonical.as_bytes()));
    let email = format!("unknown-{}@unresolved.invalid", &digest[..12]);
    Identity {
        external_id: canonical.to_string(),
        domain: domain_of(&email),
        email: Some(email),
        display_name: Some(format!("Unknown sender {}", &digest[..6])),
        confidence: CONFIDENCE_PLACEHOLDER,
        provenance: Provenance::Placeholder,
    }
}
