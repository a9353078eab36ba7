//! Gridscout Crawler - resumable crawl orchestration.
//!
//! This crate runs data-collection jobs over a partitioned search area. Each
//! job walks its grid cells in order, deduplicates listings by canonical
//! identifier, checkpoints progress so an interrupted job resumes exactly
//! where it stopped, and broadcasts progress snapshots to subscribers.
//!
//! # Features
//!
//! - Per-cell failure containment: an agent error abandons one cell, not the job
//! - Retry with linear backoff for transient navigation failures
//! - Fast and coverage budget modes
//! - Cooperative cancellation at cell boundaries
//! - Non-blocking snapshot broadcast with a `Stream` adapter for SSE layers
//!
//! # Example
//!
//! ```rust,ignore
//! use gridscout_crawler::{JobConfig, JobOrchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = JobOrchestrator::from_config(Arc::new(agent), &config)?;
//! let job_id = orchestrator.start(JobConfig::new("bakery", 200, bounds))?;
//!
//! let mut updates = orchestrator.subscribe(&job_id).expect("job exists");
//! while let Some(snapshot) = updates.next().await {
//!     println!("{}% ({} / {})", snapshot.percentage, snapshot.current, snapshot.target);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod crawler;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod snapshot;

pub use crawler::{CellCrawler, CellOutcome, CrawlSettings};
pub use error::{CrawlError, Result};
pub use job::{CellBudget, JobConfig, JobStatus};
pub use orchestrator::{JobFilter, JobOrchestrator};
pub use snapshot::{ProgressSnapshot, SnapshotSubscription};
