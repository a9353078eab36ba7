//! Gridscout Store - durable crawl progress.
//!
//! Everything a job needs to survive an interruption lives here:
//!
//! - [`dedup`] - the in-memory seen-identifier index
//! - [`state`] - the serialisable [`ProgressState`] document
//! - [`backend`] - where that document is kept (atomic JSON files or memory)
//! - [`progress`] - [`ProgressStore`], the only writer of progress state
//! - [`sink`] - where accepted records and their details are written
//!
//! # Example
//!
//! ```ignore
//! use gridscout_store::{FileBackend, ProgressStore};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(FileBackend::new(state_dir));
//! let mut store = ProgressStore::open(backend, key, params, true).await?;
//! if store.record_accepted(&id, &cell) {
//!     store.save().await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod dedup;
pub mod error;
pub mod progress;
pub mod sink;
pub mod state;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use dedup::DeduplicationIndex;
pub use error::{Result, StoreError};
pub use progress::ProgressStore;
pub use sink::{
    JsonlSink, JsonlSinkProvider, MemorySink, MemorySinkProvider, OutputMode, RecordSink,
    SinkContents, SinkProvider,
};
pub use state::{CellDistribution, JobParameters, ProgressState, STATE_VERSION};
