//! Geographic grid partitioning.
//!
//! Splits a bounding box into an N×N grid of [`SearchCell`]s in a
//! deterministic row-major order. Cell keys are stable for identical inputs,
//! which is what lets a crawl resume against a previously saved state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cell;
pub mod error;
pub mod partition;

pub use cell::SearchCell;
pub use error::{GridError, Result};
pub use partition::{partition, GridPartitioner, MAX_GRID_SIZE};
