//! The single writer of a job's progress state.

use crate::backend::StateBackend;
use crate::error::Result;
use crate::state::{JobParameters, ProgressState};
use chrono::Utc;
use gridscout_core::{CanonicalId, CellKey, JobKey};
use std::sync::Arc;

/// Owns one job's [`ProgressState`] and checkpoints it to a backend.
///
/// Mutations are in memory until [`save`](Self::save) is called; the crawler
/// decides when a checkpoint is due.
pub struct ProgressStore {
    backend: Arc<dyn StateBackend>,
    state: ProgressState,
    resumed: bool,
    dirty: bool,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("job_key", &self.state.job_key)
            .field("resumed", &self.resumed)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    /// Open the progress record for `key`.
    ///
    /// With `resume` set, stored state describing the same search is reused
    /// and its target count, cap, zoom and mode updated to `parameters`.
    /// Otherwise, or when the stored parameters differ, a fresh state
    /// replaces it and is saved immediately.
    pub async fn open(
        backend: Arc<dyn StateBackend>,
        key: JobKey,
        parameters: JobParameters,
        resume: bool,
    ) -> Result<Self> {
        let existing = if resume { backend.load(&key).await? } else { None };

        let reusable = existing.filter(|state| {
            let same = state.parameters.is_same_job(&parameters);
            if !same {
                tracing::warn!(
                    job_key = %key,
                    "Stored progress belongs to a different search, starting fresh"
                );
            }
            same
        });

        let mut store = match reusable {
            Some(mut state) => {
                tracing::info!(
                    job_key = %key,
                    completed_cells = state.completed_cells.len(),
                    accepted = state.accepted_count,
                    "Resuming from saved progress"
                );
                let dirty = state.parameters != parameters;
                state.parameters = parameters;
                Self {
                    backend,
                    state,
                    resumed: true,
                    dirty,
                }
            }
            None => Self {
                backend,
                state: ProgressState::new(key, parameters),
                resumed: false,
                dirty: true,
            },
        };

        if store.dirty {
            store.save().await?;
        }
        Ok(store)
    }

    /// Read the durable copy of this job's state, bypassing memory.
    pub async fn load(&self) -> Result<Option<ProgressState>> {
        self.backend.load(&self.state.job_key).await
    }

    /// Checkpoint the current state.
    pub async fn save(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        self.backend.save(&self.state).await?;
        self.dirty = false;
        Ok(())
    }

    /// Record an accepted identifier found in `cell`.
    ///
    /// Returns `false` and changes nothing when the identifier was already
    /// seen.
    pub fn record_accepted(&mut self, id: &CanonicalId, cell: &CellKey) -> bool {
        if !self.state.seen_ids.insert(id.clone()) {
            return false;
        }
        self.state.accepted_count += 1;
        *self.state.cell_results.entry(cell.clone()).or_insert(0) += 1;
        self.dirty = true;
        true
    }

    /// Mark `cell` as fully processed. Returns `false` if it already was.
    ///
    /// Callers must have saved every record accepted in the cell first.
    pub fn mark_cell_completed(&mut self, cell: &CellKey) -> bool {
        if !self.state.completed_cells.insert(cell.clone()) {
            return false;
        }
        self.state.cell_results.entry(cell.clone()).or_insert(0);
        self.dirty = true;
        true
    }

    /// Whether `cell` is marked completed.
    #[must_use]
    pub fn is_cell_completed(&self, cell: &CellKey) -> bool {
        self.state.is_cell_completed(cell)
    }

    /// Move the durable state out of the resumable set.
    pub async fn archive(&self) -> Result<()> {
        self.backend.archive(&self.state.job_key).await
    }

    /// Current in-memory state.
    #[must_use]
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Key the state is stored under.
    #[must_use]
    pub fn job_key(&self) -> &JobKey {
        &self.state.job_key
    }

    /// Whether the store was opened from previously saved progress.
    #[must_use]
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Whether there are changes not yet checkpointed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
