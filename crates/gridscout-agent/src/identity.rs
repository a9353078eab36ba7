//! Canonical identifier derivation for scraped listings.

use crate::agent::RawItem;
use crate::error::ItemError;
use gridscout_core::CanonicalId;
use regex::Regex;
use std::sync::OnceLock;

/// `!19s<place id>` segment of a listing URL.
fn place_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!19s([^!?&/#]+)").expect("valid place id regex"))
}

/// Hex feature id pair (`0x…:0x…`) used in `data=` segments.
fn feature_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(0x[0-9a-f]+:0x[0-9a-f]+)").expect("valid feature id regex")
    })
}

/// Derive the canonical identifier for a listing.
///
/// An explicit `place_id` from the agent wins. Otherwise the source URL is
/// searched for a `!19s` place id, then for a hex feature id pair. A token
/// with neither is rejected rather than used verbatim, since the same place
/// reached through two different URLs must map to one identifier.
pub fn derive_identifier(item: &RawItem) -> Result<CanonicalId, ItemError> {
    if let Some(id) = item.place_id.as_deref().map(str::trim) {
        if !id.is_empty() {
            return canonical(id);
        }
    }

    let token = item.source_url.trim();
    if token.is_empty() {
        return Err(ItemError::MissingToken);
    }

    if let Some(caps) = place_id_pattern().captures(token) {
        return canonical(&caps[1]);
    }

    if let Some(caps) = feature_id_pattern().captures(token) {
        tracing::trace!(token, "No place id, falling back to feature id");
        return canonical(&caps[1].to_ascii_lowercase());
    }

    tracing::debug!(token, "Source token carries no identifier");
    Err(ItemError::UnrecognizedToken(token.to_string()))
}

fn canonical(id: &str) -> Result<CanonicalId, ItemError> {
    CanonicalId::new(id).map_err(|e| ItemError::InvalidPayload {
        field: "place_id",
        reason: e.to_string(),
    })
}
