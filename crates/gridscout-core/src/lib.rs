//! Gridscout Core - Foundation crate for the gridscout crawl orchestrator.
//!
//! This crate provides the shared newtypes, configuration management and
//! logging setup that every other gridscout crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Configuration and validation errors using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Shared newtypes (`JobId`, `JobKey`, `CellKey`, `CanonicalId`, `Bounds`)
//! - [`logging`] - `tracing-subscriber` initialisation
//!
//! # Example
//!
//! ```rust
//! use gridscout_core::{AppConfig, Bounds};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert_eq!(config.crawl.default_grid_size, 2);
//!
//! let bounds = Bounds::new(43.6, -79.5, 43.9, -79.2)?;
//! assert!(bounds.contains(gridscout_core::GeoPoint::new(43.7, -79.4)));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, CrawlConfig, LoggingConfig, OrchestratorConfig, StorageConfig};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_tracing;
pub use types::{Bounds, CanonicalId, CellKey, GeoPoint, JobId, JobKey, ScrapingMode};
