//! Job configuration and lifecycle.

use crate::error::{CrawlError, Result};
use gridscout_core::{Bounds, CrawlConfig, JobKey, ScrapingMode};
use gridscout_grid::MAX_GRID_SIZE;
use gridscout_store::JobParameters;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a job.
///
/// `Pending → Running → {Completed, Failed, Cancelled}`, plus
/// `Pending → Cancelled` for a job cancelled while queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency permit
    Pending,
    /// Crawling cells
    Running,
    /// All cells exhausted or target reached
    Completed,
    /// Stopped by a persistence or configuration failure
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition_to(&mut self, next: Self) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Validated parameters of one crawl job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Query sent to the agent for every cell
    pub search_term: String,
    /// Unique records to collect
    pub target_count: u32,
    /// Area to search
    pub bounds: Bounds,
    /// Grid dimension
    pub grid_size: u32,
    /// Raw listings requested per cell
    pub max_per_cell: u32,
    /// Reviews fetched per accepted record; 0 disables detail fetches
    pub max_details: u32,
    /// Zoom hint for the agent
    pub zoom: u8,
    /// Budget distribution over cells
    pub mode: ScrapingMode,
    /// Continue from saved progress when it matches this search
    pub resume: bool,
    /// Explicit state key; derived from the search when `None`
    pub job_key: Option<JobKey>,
}

impl JobConfig {
    /// Job with crate defaults for everything but the search itself.
    pub fn new(search_term: impl Into<String>, target_count: u32, bounds: Bounds) -> Self {
        Self::from_defaults(&CrawlConfig::default(), search_term, target_count, bounds)
    }

    /// Job taking grid, caps, zoom and mode from `crawl`.
    pub fn from_defaults(
        crawl: &CrawlConfig,
        search_term: impl Into<String>,
        target_count: u32,
        bounds: Bounds,
    ) -> Self {
        Self {
            search_term: search_term.into(),
            target_count,
            bounds,
            grid_size: crawl.default_grid_size,
            max_per_cell: crawl.max_per_cell,
            max_details: crawl.max_details_per_record,
            zoom: crawl.default_zoom,
            mode: crawl.default_mode,
            resume: true,
            job_key: None,
        }
    }

    /// Set the grid dimension.
    #[must_use]
    pub fn with_grid_size(mut self, grid_size: u32) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Set the raw listing cap per cell.
    #[must_use]
    pub fn with_max_per_cell(mut self, max: u32) -> Self {
        self.max_per_cell = max;
        self
    }

    /// Set the reviews fetched per record; 0 disables detail fetches.
    #[must_use]
    pub fn with_max_details(mut self, max: u32) -> Self {
        self.max_details = max;
        self
    }

    /// Set the zoom hint.
    #[must_use]
    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    /// Set the budget mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ScrapingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Choose whether saved progress is resumed.
    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Store progress under an explicit key.
    #[must_use]
    pub fn with_job_key(mut self, key: JobKey) -> Self {
        self.job_key = Some(key);
        self
    }

    /// Check every field. A job that fails here is never scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.search_term.trim().is_empty() {
            return Err(CrawlError::Configuration(
                "search term must not be empty".to_string(),
            ));
        }
        if self.target_count == 0 {
            return Err(CrawlError::Configuration(
                "target count must be at least 1".to_string(),
            ));
        }
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(CrawlError::Configuration(format!(
                "grid size must be between 1 and {MAX_GRID_SIZE}, got {}",
                self.grid_size
            )));
        }
        if self.max_per_cell == 0 {
            return Err(CrawlError::Configuration(
                "max per cell must be at least 1".to_string(),
            ));
        }
        if !(1..=21).contains(&self.zoom) {
            return Err(CrawlError::Configuration(format!(
                "zoom must be between 1 and 21, got {}",
                self.zoom
            )));
        }
        self.bounds.validate()?;
        Ok(())
    }

    /// Key the job's progress is stored under.
    #[must_use]
    pub fn job_key(&self) -> JobKey {
        self.job_key
            .clone()
            .unwrap_or_else(|| self.parameters().derived_key())
    }

    /// Parameters recorded in the progress state.
    #[must_use]
    pub fn parameters(&self) -> JobParameters {
        JobParameters {
            search_term: self.search_term.trim().to_string(),
            target_count: self.target_count,
            bounds: self.bounds,
            grid_size: self.grid_size,
            max_per_cell: self.max_per_cell,
            zoom: self.zoom,
            mode: self.mode,
        }
    }

    /// Record budget for the next cell given what is still needed.
    ///
    /// Fast mode lets any cell take the whole remainder; coverage mode caps
    /// each cell at its even share of the target.
    #[must_use]
    pub fn cell_budget(&self, remaining: u64) -> CellBudget {
        match self.mode {
            ScrapingMode::Fast => CellBudget::remaining(remaining),
            ScrapingMode::Coverage => {
                let cells = u64::from(self.grid_size) * u64::from(self.grid_size);
                let share = u64::from(self.target_count).div_ceil(cells);
                if share <= remaining {
                    CellBudget::share(share)
                } else {
                    CellBudget::remaining(remaining)
                }
            }
        }
    }
}

/// How many new records one cell may contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellBudget {
    /// Most records the cell may accept
    pub limit: u64,
    /// Reaching the limit finishes the cell, since it is the cell's own
    /// share; otherwise only the job target was reached
    pub completes_cell: bool,
}

impl CellBudget {
    /// Budget bounded by what the whole job still needs.
    #[must_use]
    pub fn remaining(limit: u64) -> Self {
        Self {
            limit,
            completes_cell: false,
        }
    }

    /// Budget bounded by the cell's share of the target.
    #[must_use]
    pub fn share(limit: u64) -> Self {
        Self {
            limit,
            completes_cell: true,
        }
    }
}
