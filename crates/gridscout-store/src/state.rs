//! Durable job progress document.

use chrono::{DateTime, Utc};
use gridscout_core::{Bounds, CanonicalId, CellKey, JobKey, ScrapingMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Layout version written into every state document.
pub const STATE_VERSION: u32 = 1;

/// Search parameters stored alongside progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Query sent to the extraction agent
    pub search_term: String,
    /// Number of unique records the job aims to collect
    pub target_count: u32,
    /// Area being searched
    pub bounds: Bounds,
    /// Grid dimension; the area is split into `grid_size²` cells
    pub grid_size: u32,
    /// Raw listings requested per cell
    pub max_per_cell: u32,
    /// Zoom hint for the agent
    pub zoom: u8,
    /// How the target is spread over cells
    #[serde(default)]
    pub mode: ScrapingMode,
}

impl JobParameters {
    /// Whether `other` describes the same search.
    ///
    /// Target count, cap, zoom and mode may change between runs without
    /// invalidating progress; the term, area and grid may not, because they
    /// decide which cells exist.
    #[must_use]
    pub fn is_same_job(&self, other: &Self) -> bool {
        self.search_term.trim().eq_ignore_ascii_case(other.search_term.trim())
            && same_bounds(&self.bounds, &other.bounds)
            && self.grid_size == other.grid_size
    }

    /// Key derived from the identifying parameters.
    #[must_use]
    pub fn derived_key(&self) -> JobKey {
        JobKey::derive(&self.search_term, &self.bounds, self.grid_size)
    }

    /// Number of cells in the grid.
    #[must_use]
    pub fn total_cells(&self) -> u32 {
        self.grid_size * self.grid_size
    }
}

/// Coordinates closer than this are the same edge; JSON float parsing is
/// not guaranteed to round-trip the last bit.
const BOUNDS_EPSILON: f64 = 1e-9;

fn same_bounds(a: &Bounds, b: &Bounds) -> bool {
    [
        (a.min_lat, b.min_lat),
        (a.min_lng, b.min_lng),
        (a.max_lat, b.max_lat),
        (a.max_lng, b.max_lng),
    ]
    .iter()
    .all(|(x, y)| (x - y).abs() < BOUNDS_EPSILON)
}

/// Statistics over accepted-records-per-cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CellDistribution {
    /// Cells that contributed at least one record
    pub cells_with_results: u32,
    /// Fewest records from a completed cell
    pub min_per_cell: u32,
    /// Most records from a completed cell
    pub max_per_cell: u32,
    /// Mean records over completed cells
    pub avg_per_cell: f64,
}

/// Everything needed to resume a job exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Document layout version
    pub version: u32,
    /// Key this state is stored under
    pub job_key: JobKey,
    /// Parameters of the most recent run
    pub parameters: JobParameters,
    /// Cells whose records are all durably persisted
    pub completed_cells: BTreeSet<CellKey>,
    /// Identifiers of every accepted record
    pub seen_ids: BTreeSet<CanonicalId>,
    /// Number of accepted records
    pub accepted_count: u64,
    /// Accepted records per cell, including partially processed cells
    #[serde(default)]
    pub cell_results: BTreeMap<CellKey, u32>,
    /// When the job was first started
    pub created_at: DateTime<Utc>,
    /// Last checkpoint time
    pub updated_at: DateTime<Utc>,
}

impl ProgressState {
    /// Fresh state with nothing completed.
    #[must_use]
    pub fn new(job_key: JobKey, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            job_key,
            parameters,
            completed_cells: BTreeSet::new(),
            seen_ids: BTreeSet::new(),
            accepted_count: 0,
            cell_results: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the cell has been marked completed.
    #[must_use]
    pub fn is_cell_completed(&self, cell: &CellKey) -> bool {
        self.completed_cells.contains(cell)
    }

    /// Whether the target count has been reached.
    #[must_use]
    pub fn target_reached(&self) -> bool {
        self.accepted_count >= u64::from(self.parameters.target_count)
    }

    /// Records still needed to reach the target.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        u64::from(self.parameters.target_count).saturating_sub(self.accepted_count)
    }

    /// Distribution of accepted records over completed cells.
    #[must_use]
    pub fn distribution(&self) -> CellDistribution {
        let cells_with_results = self.cell_results.values().filter(|n| **n > 0).count();
        let counts: Vec<u32> = self
            .completed_cells
            .iter()
            .map(|cell| self.cell_results.get(cell).copied().unwrap_or(0))
            .collect();

        if counts.is_empty() {
            return CellDistribution {
                cells_with_results: u32::try_from(cells_with_results).unwrap_or(u32::MAX),
                ..CellDistribution::default()
            };
        }

        let total: u64 = counts.iter().map(|n| u64::from(*n)).sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = total as f64 / counts.len() as f64;
        CellDistribution {
            cells_with_results: u32::try_from(cells_with_results).unwrap_or(u32::MAX),
            min_per_cell: counts.iter().copied().min().unwrap_or(0),
            max_per_cell: counts.iter().copied().max().unwrap_or(0),
            avg_per_cell: (avg * 10.0).round() / 10.0,
        }
    }
}
