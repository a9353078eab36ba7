//! Validated business records.

use crate::agent::RawItem;
use crate::error::ItemError;
use crate::identity::derive_identifier;
use crate::reviews::ReviewMetrics;
use chrono::{DateTime, Utc};
use gridscout_core::{CanonicalId, CellKey};
use serde::{Deserialize, Serialize};

/// Placeholder name the agent emits when a detail panel failed to render.
const FAILED_EXTRACTION_NAME: &str = "Extraction Failed";

/// Service flags shown on a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOptions {
    pub in_store_shopping: bool,
    pub in_store_pickup: bool,
    pub delivery: bool,
}

/// Attributes scraped from a listing's detail panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessAttributes {
    pub name: String,
    pub address: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub category: Option<String>,
    /// Average star rating, 0.0 to 5.0
    pub rating: Option<f32>,
    pub review_count: u32,
    pub opens_at: Option<String>,
    pub introduction: Option<String>,
    pub services: ServiceOptions,
}

impl BusinessAttributes {
    /// Trim fields, drop empty optionals, prefix bare websites with
    /// `https://` and discard out-of-range ratings.
    ///
    /// # Errors
    /// Returns [`ItemError::InvalidPayload`] when the name is missing or is
    /// the agent's extraction-failure placeholder.
    pub fn normalized(self) -> Result<Self, ItemError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ItemError::InvalidPayload {
                field: "name",
                reason: "must not be blank".to_string(),
            });
        }
        if name == FAILED_EXTRACTION_NAME {
            return Err(ItemError::InvalidPayload {
                field: "name",
                reason: "detail panel failed to load".to_string(),
            });
        }

        let website = non_empty(self.website).map(|w| {
            if w.starts_with("http://") || w.starts_with("https://") {
                w
            } else {
                format!("https://{w}")
            }
        });
        let rating = self
            .rating
            .filter(|r| r.is_finite() && (0.0..=5.0).contains(r));

        Ok(Self {
            name,
            address: non_empty(self.address),
            website,
            phone: non_empty(self.phone),
            category: non_empty(self.category),
            rating,
            review_count: self.review_count,
            opens_at: non_empty(self.opens_at),
            introduction: non_empty(self.introduction),
            services: self.services,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A listing that passed identity derivation and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: CanonicalId,
    /// Cell in which the record was first accepted
    pub cell: CellKey,
    pub source_url: String,
    pub attributes: BusinessAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_metrics: Option<ReviewMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Build a record from a raw listing found in `cell`.
    ///
    /// # Errors
    /// Returns [`ItemError`] if no identifier can be derived or the
    /// attributes are invalid.
    pub fn from_raw(item: &RawItem, cell: CellKey) -> Result<Self, ItemError> {
        let id = derive_identifier(item)?;
        let attributes = item.attributes.clone().normalized()?;
        Ok(Self {
            id,
            cell,
            source_url: item.source_url.trim().to_string(),
            attributes,
            review_metrics: None,
            collected_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn with_review_metrics(mut self, metrics: ReviewMetrics) -> Self {
        self.review_metrics = Some(metrics);
        self
    }
}
