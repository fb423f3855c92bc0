//! Identifier normalization for identity resolution.
//!
//! Upstream identifiers arrive in several spellings for the same person:
//! a bare address, an RFC 5322 name-addr, a namespace-prefixed resource id
//! (`users/113948...`). Lookups and alias recording go through the
//! candidate forms derived here so they all land on one canonical row.

pub fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();

    let Some((local, domain)) = email.split_once('@') else {
        return email;
    };

    // Strip +tag subaddressing (Gmail, Outlook, Fastmail, etc.)
    let local = match local.split_once('+') {
        Some((base, _)) => base,
        None => local,
    };

    // Strip dots from local part for Gmail/Googlemail
    let local = if domain == "gmail.com" || domain == "googlemail.com" {
        local.replace('.', "")
    } else {
        local.to_string()
    };

    format!("{}@{}", local, domain)
}

/// An email identifier split into display name and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub display_name: Option<String>,
    pub email: String,
}

/// Parse an email-shaped identifier, bare or name-addr form.
/// Returns None for anything that is not a parseable address.
pub fn parse_name_addr(identifier: &str) -> Option<ParsedAddress> {
    if !identifier.contains('@') {
        return None;
    }
    let parsed = mailparse::addrparse(identifier.trim()).ok()?;
    for addr in parsed.iter() {
        if let mailparse::MailAddr::Single(info) = addr {
            return Some(ParsedAddress {
                display_name: info.display_name.clone(),
                email: info.addr.to_lowercase(),
            });
        }
    }
    None
}

/// Canonical form of an identifier: the lowercased bare address for
/// email-shaped input, the trimmed original otherwise.
pub fn canonical_identifier(identifier: &str) -> String {
    match parse_name_addr(identifier) {
        Some(parsed) => parsed.email,
        None => identifier.trim().to_string(),
    }
}

/// Alternate lookup forms for an identifier, canonical form excluded.
///
/// Namespace-prefixed resource ids alias to the trailing id with the
/// prefix stripped; email-shaped identifiers alias to their normalized
/// address.
pub fn alias_candidates(identifier: &str) -> Vec<String> {
    let canonical = canonical_identifier(identifier);
    let mut candidates = Vec::new();
    let mut push = |candidate: String| {
        if !candidate.is_empty() && candidate != canonical && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    let trimmed = identifier.trim();
    if trimmed != canonical {
        push(trimmed.to_string());
    }
    if let Some((_, tail)) = canonical.rsplit_once('/') {
        push(tail.to_string());
    }
    if canonical.contains('@') {
        push(normalize_email(&canonical));
    }

    candidates
}
