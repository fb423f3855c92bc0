//! Resolved identity types and confidence scale
//!
//! Confidence is a 0-100 trust score. Higher-confidence data must never be
//! overwritten by lower-confidence data; the store enforces this with a
//! max-confidence upsert.

use serde::{Deserialize, Serialize};

/// Directory profile with a display name. The strongest signal available.
pub const CONFIDENCE_DIRECTORY_COMPLETE: u8 = 100;
/// Directory profile without a display name.
pub const CONFIDENCE_DIRECTORY: u8 = 95;
/// Identifier was itself an email address.
pub const CONFIDENCE_EMAIL_DIRECT: u8 = 90;
/// Deterministic placeholder. A documented heuristic, not a real identity.
pub const CONFIDENCE_PLACEHOLDER: u8 = 25;

/// Which resolution strategy produced a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Canonical profile from the external directory service
    Directory,
    /// Synthesized from an email-shaped identifier
    Email,
    /// Deterministic fallback for an unresolvable identifier
    Placeholder,
    /// Seeded externally (imports, manual entry)
    Seed,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Directory => "directory",
            Provenance::Email => "email",
            Provenance::Placeholder => "placeholder",
            Provenance::Seed => "seed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "directory" => Some(Provenance::Directory),
            "email" => Some(Provenance::Email),
            "placeholder" => Some(Provenance::Placeholder),
            "seed" => Some(Provenance::Seed),
            _ => None,
        }
    }
}

/// A resolved identity as returned to callers. Never empty: the resolver
/// falls back to a placeholder rather than failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub domain: Option<String>,
    pub confidence: u8,
    pub provenance: Provenance,
}

/// A persisted identity mapping row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub id: String,
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub domain: Option<String>,
    pub confidence: u8,
    pub provenance: Provenance,
    pub seen_count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

impl IdentityMapping {
    pub fn to_identity(&self) -> Identity {
        Identity {
            external_id: self.external_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            domain: self.domain.clone(),
            confidence: self.confidence,
            provenance: self.provenance,
        }
    }
}

/// Domain part of an email address, lowercased
pub fn domain_of(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}
