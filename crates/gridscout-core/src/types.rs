//! Shared types used across gridscout.
//!
//! This module defines the newtypes that name jobs, cells and records, and the
//! geographic primitives the grid is built from.

use crate::error::{ConfigError, ConfigResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Newtype for in-memory job identifiers.
///
/// Job IDs are UUID v4 strings, generated when a job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a `JobId` from an existing string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> ConfigResult<Self> {
        let id = id.into();
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(ConfigError::invalid(
                "job_id",
                format!("must be a valid UUID v4, got '{id}'"),
            ))
        }
    }

    /// Create a new random `JobId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key naming a job's durable progress record.
///
/// Unlike [`JobId`], the key is stable across process restarts: it is either
/// supplied explicitly or derived from the search parameters, so that the same
/// search resumes from the same state file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey(String);

impl JobKey {
    /// Create a `JobKey` from a string.
    ///
    /// Keys are used as file names, so they must be 1-96 characters of
    /// lowercase alphanumerics, `-` or `_`.
    pub fn new(key: impl Into<String>) -> ConfigResult<Self> {
        let key = key.into();
        static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex =
            KEY_REGEX.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,95}$").expect("valid regex"));

        if regex.is_match(&key) {
            Ok(Self(key))
        } else {
            Err(ConfigError::invalid(
                "job_key",
                format!("must be 1-96 lowercase alphanumerics, '-' or '_', got '{key}'"),
            ))
        }
    }

    /// Derive a key from the parameters that identify a search.
    ///
    /// The key is a slug of the search term followed by the first 16 hex
    /// characters of a SHA-256 over the term, bounds and grid size.
    #[must_use]
    pub fn derive(search_term: &str, bounds: &Bounds, grid_size: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(search_term.trim().to_lowercase().as_bytes());
        hasher.update(
            format!(
                "|{:.6}|{:.6}|{:.6}|{:.6}|{grid_size}",
                bounds.min_lat, bounds.min_lng, bounds.max_lat, bounds.max_lng
            )
            .as_bytes(),
        );
        let digest = hex::encode(hasher.finalize());

        let mut slug = String::new();
        for c in search_term.trim().to_lowercase().chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
            if slug.len() >= 32 {
                break;
            }
        }
        let slug = slug.trim_end_matches('-');
        let slug = if slug.is_empty() { "job" } else { slug };

        Self(format!("{slug}-{}", &digest[..16]))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable key of a grid cell, `"{row}_{col}"` with 1-based indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellKey {
    row: u32,
    col: u32,
}

impl CellKey {
    /// Create a key from 1-based row and column indices.
    #[must_use]
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// 1-based row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.row
    }

    /// 1-based column index.
    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.row, self.col)
    }
}

impl FromStr for CellKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::invalid("cell_key", format!("expected 'row_col', got '{s}'"));
        let (row, col) = s.split_once('_').ok_or_else(invalid)?;
        let row: u32 = row.parse().map_err(|_| invalid())?;
        let col: u32 = col.parse().map_err(|_| invalid())?;
        if row == 0 || col == 0 {
            return Err(invalid());
        }
        Ok(Self { row, col })
    }
}

impl TryFrom<String> for CellKey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CellKey> for String {
    fn from(key: CellKey) -> Self {
        key.to_string()
    }
}

/// Canonical identifier of a collected record.
///
/// Derived from a source-specific token and treated as an opaque key: two
/// records with the same `CanonicalId` are the same place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Create a `CanonicalId`, rejecting blank values.
    pub fn new(id: impl Into<String>) -> ConfigResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::invalid("canonical_id", "must not be blank"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// An axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Southern edge
    pub min_lat: f64,
    /// Western edge
    pub min_lng: f64,
    /// Northern edge
    pub max_lat: f64,
    /// Eastern edge
    pub max_lng: f64,
}

impl Bounds {
    /// Create validated bounds.
    ///
    /// # Errors
    /// Returns error if any coordinate is non-finite or out of range, or if
    /// the box is empty on either axis.
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> ConfigResult<Self> {
        let bounds = Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Check that the box is well-formed.
    pub fn validate(&self) -> ConfigResult<()> {
        let coords = [self.min_lat, self.min_lng, self.max_lat, self.max_lng];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::invalid("bounds", "coordinates must be finite"));
        }
        if self.min_lat >= self.max_lat || self.min_lng >= self.max_lng {
            return Err(ConfigError::invalid(
                "bounds",
                "min values must be less than max values",
            ));
        }
        if !(-90.0..=90.0).contains(&self.min_lat) || !(-90.0..=90.0).contains(&self.max_lat) {
            return Err(ConfigError::invalid(
                "bounds",
                "latitude must be between -90 and 90",
            ));
        }
        if !(-180.0..=180.0).contains(&self.min_lng) || !(-180.0..=180.0).contains(&self.max_lng)
        {
            return Err(ConfigError::invalid(
                "bounds",
                "longitude must be between -180 and 180",
            ));
        }
        Ok(())
    }

    /// Height of the box in degrees of latitude.
    #[must_use]
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Width of the box in degrees of longitude.
    #[must_use]
    pub fn lng_span(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            self.min_lat + self.lat_span() / 2.0,
            self.min_lng + self.lng_span() / 2.0,
        )
    }

    /// Whether the point lies inside the box, edges included.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

/// How the target count is spread over the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapingMode {
    /// Each cell may collect whatever is left of the global target.
    #[default]
    Fast,
    /// Each cell is limited to its fair share of the target.
    Coverage,
}

impl fmt::Display for ScrapingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Coverage => write!(f, "coverage"),
        }
    }
}

impl FromStr for ScrapingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "coverage" => Ok(Self::Coverage),
            other => Err(ConfigError::invalid(
                "mode",
                format!("expected 'fast' or 'coverage', got '{other}'"),
            )),
        }
    }
}
