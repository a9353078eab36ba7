//! Extraction agent interface for gridscout.
//!
//! The agent is the external collaborator that renders a map area and returns
//! raw listings. This crate defines what the crawler expects from it, how a
//! raw listing becomes a [`CanonicalRecord`], and the review metrics computed
//! from detail fetches.

pub mod agent;
pub mod error;
pub mod identity;
pub mod record;
pub mod reviews;

pub use agent::{CellQuery, DetailItem, DetailPayload, ExtractionAgent, RawItem};
pub use error::{AgentError, ItemError, Result};
pub use identity::derive_identifier;
pub use record::{BusinessAttributes, CanonicalRecord, ServiceOptions};
pub use reviews::{analyze_reviews, parse_review_date, ReviewMetrics};
