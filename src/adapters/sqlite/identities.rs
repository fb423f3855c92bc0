//! Identity mapping store.
//!
//! The upsert is a single SQL statement so concurrent resolutions of the
//! same identifier race safely: confidence only ratchets upward, profile
//! fields move only when the incoming confidence is at least the stored
//! one, and empty incoming fields never blank stored ones.

use rusqlite::params;
use uuid::Uuid;

use super::DbPool;
use crate::error::Result;
use crate::types::identity::{IdentityMapping, Provenance};

/// Input shape for an upsert, produced by the resolver.
pub struct NewIdentityMapping {
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub domain: Option<String>,
    pub confidence: u8,
    pub provenance: Provenance,
    pub seen_at: i64,
}

/// Upsert a mapping with max-confidence semantics and record its aliases.
/// Returns the canonical row id.
pub fn upsert_identity_mapping(
    pool: &DbPool,
    mapping: &NewIdentityMapping,
    aliases: &[String],
) -> Result<String> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO identity_mappings (
            id, external_id, email, display_name, domain,
            confidence, provenance, seen_count, first_seen, last_seen
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
        ON CONFLICT(external_id) DO UPDATE SET
            email = CASE
                WHEN excluded.confidence >= identity_mappings.confidence
                THEN COALESCE(excluded.email, identity_mappings.email)
                ELSE identity_mappings.email
            END,
            display_name = CASE
                WHEN excluded.confidence >= identity_mappings.confidence
                THEN COALESCE(excluded.display_name, identity_mappings.display_name)
                ELSE identity_mappings.display_name
            END,
            domain = CASE
                WHEN excluded.confidence >= identity_mappings.confidence
                THEN COALESCE(excluded.domain, identity_mappings.domain)
                ELSE identity_mappings.domain
            END,
            provenance = CASE
                WHEN excluded.confidence >= identity_mappings.confidence
                THEN excluded.provenance
                ELSE identity_mappings.provenance
            END,
            confidence = MAX(identity_mappings.confidence, excluded.confidence),
            seen_count = identity_mappings.seen_count + 1,
            last_seen = MAX(identity_mappings.last_seen, excluded.last_seen)",
        params![
            Uuid::new_v4().to_string(),
            mapping.external_id,
            mapping.email,
            mapping.display_name,
            mapping.domain,
            mapping.confidence,
            mapping.provenance.as_str(),
            mapping.seen_at,
        ],
    )?;

    // On conflict the generated id above is discarded; read the canonical one.
    let identity_id: String = tx.query_row(
        "SELECT id FROM identity_mappings WHERE external_id = ?1",
        params![mapping.external_id],
        |row| row.get(0),
    )?;

    for alias in aliases {
        if alias == &mapping.external_id {
            continue;
        }
        tx.execute(
            "INSERT OR IGNORE INTO identity_aliases (alias, identity_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![alias, identity_id, mapping.seen_at],
        )?;
    }

    tx.commit()?;
    Ok(identity_id)
}

/// Look a mapping up by canonical identifier or any recorded alias.
/// An exact external_id match wins over an alias match.
pub fn find_identity_mapping(pool: &DbPool, identifier_or_alias: &str) -> Result<Option<IdentityMapping>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.id, m.external_id, m.email, m.display_name, m.domain,
                m.confidence, m.provenance, m.seen_count, m.first_seen, m.last_seen
         FROM identity_mappings m
         LEFT JOIN identity_aliases a ON a.identity_id = m.id
         WHERE m.external_id = ?1 OR a.alias = ?1
         ORDER BY (m.external_id = ?1) DESC, m.confidence DESC
         LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![identifier_or_alias], row_to_mapping)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn row_to_mapping(row: &rusqlite::Row) -> rusqlite::Result<IdentityMapping> {
    let provenance_text: String = row.get(6)?;
    let provenance = Provenance::parse(&provenance_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown provenance: {}", provenance_text).into(),
        )
    })?;
    Ok(IdentityMapping {
        id: row.get(0)?,
        external_id: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        domain: row.get(4)?,
        confidence: row.get(5)?,
        provenance,
        seen_count: row.get(7)?,
        first_seen: row.get(8)?,
        last_seen: row.get(9)?,
    })
}
