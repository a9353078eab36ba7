use crate::error::Result;
use crate::record::BusinessAttributes;
use gridscout_core::GeoPoint;
use serde::{Deserialize, Serialize};

/// What to search for in one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellQuery {
    pub search_term: String,
    pub center: GeoPoint,
    pub zoom: u8,
    /// Upper bound on returned listings
    pub cap: u32,
}

/// A listing as the agent scraped it, before identity and validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Listing URL or other source token the identifier is derived from
    pub source_url: String,
    /// Explicit place identifier, when the agent could read one directly
    pub place_id: Option<String>,
    pub attributes: BusinessAttributes,
}

/// One review attached to a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailItem {
    pub reviewer_name: String,
    pub text: String,
    /// Star rating 1-5, 0 when unknown
    pub rating: u8,
    /// Date as displayed, often relative ("3 weeks ago")
    pub date_text: String,
    pub owner_response: Option<String>,
    pub language: Option<String>,
}

impl DetailItem {
    /// Trim text fields and clamp an out-of-range rating to 0.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.reviewer_name = self.reviewer_name.trim().to_string();
        self.text = self.text.trim().to_string();
        self.date_text = self.date_text.trim().to_string();
        self.owner_response = self
            .owner_response
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if self.rating > 5 {
            self.rating = 0;
        }
        self
    }

    pub fn has_owner_response(&self) -> bool {
        self.owner_response
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

/// Detail fetched for one listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailPayload {
    pub items: Vec<DetailItem>,
    /// False when the agent stopped at an internal limit or scroll exhaustion
    /// before reading everything the listing advertises
    pub complete: bool,
}

/// The page-rendering collaborator that turns a map position into listings.
///
/// Implementations typically wrap a single browser session and are not
/// expected to serve concurrent navigations; the crawler calls them one cell
/// at a time per job.
#[async_trait::async_trait]
pub trait ExtractionAgent: Send + Sync {
    /// Search around the query's center and return up to `cap` listings in
    /// display order. An error abandons the whole cell.
    async fn fetch_cell(&self, query: &CellQuery) -> Result<Vec<RawItem>>;

    /// Fetch up to `max_items` reviews for a listing. Partial results are
    /// returned as `Ok` with `complete = false`.
    async fn fetch_details(&self, item: &RawItem, max_items: u32) -> Result<DetailPayload>;
}
