//! Progress state storage backends.

use crate::error::{Result, StoreError};
use crate::state::{ProgressState, STATE_VERSION};
use async_trait::async_trait;
use chrono::Utc;
use gridscout_core::JobKey;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable home of [`ProgressState`] documents, one per job key.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the state stored under `key`, if any.
    async fn load(&self, key: &JobKey) -> Result<Option<ProgressState>>;

    /// Replace the stored state atomically: after an error the previous
    /// document is still readable.
    async fn save(&self, state: &ProgressState) -> Result<()>;

    /// Move the state for `key` out of the resumable set. Archiving a key
    /// with no stored state is not an error.
    async fn archive(&self, key: &JobKey) -> Result<()>;
}

/// JSON files under a state directory.
///
/// `<dir>/<job_key>.json` holds the live document; archived documents move
/// to `<dir>/archive/<job_key>-<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Backend rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding live state documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live document for `key`.
    #[must_use]
    pub fn state_path(&self, key: &JobKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Directory receiving archived documents.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }
}

fn check_version(state: &ProgressState) -> Result<()> {
    if state.version == STATE_VERSION {
        Ok(())
    } else {
        Err(StoreError::UnsupportedVersion {
            found: state.version,
            expected: STATE_VERSION,
        })
    }
}

/// Write `bytes` to a temp file beside `target`, fsync it, then rename it
/// over `target`.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self, key: &JobKey) -> Result<Option<ProgressState>> {
        let path = self.state_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: ProgressState = serde_json::from_slice(&bytes)?;
        check_version(&state)?;
        tracing::debug!(
            job_key = %key,
            completed_cells = state.completed_cells.len(),
            accepted = state.accepted_count,
            "Loaded progress state"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &ProgressState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let dir = self.dir.clone();
        let target = self.state_path(&state.job_key);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes)).await??;
        Ok(())
    }

    async fn archive(&self, key: &JobKey) -> Result<()> {
        let source = self.state_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Ok(());
        }

        let archive_dir = self.archive_dir();
        tokio::fs::create_dir_all(&archive_dir).await?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let target = archive_dir.join(format!("{key}-{stamp}.json"));
        tokio::fs::rename(&source, &target).await?;

        tracing::info!(job_key = %key, path = %target.display(), "Archived progress state");
        Ok(())
    }
}

/// In-memory backend for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    live: Mutex<HashMap<JobKey, ProgressState>>,
    archived: Mutex<Vec<ProgressState>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Archived documents in archive order.
    pub fn archived(&self) -> Vec<ProgressState> {
        self.archived
            .lock()
            .expect("MemoryBackend lock poisoned")
            .clone()
    }

    /// Live document for `key`.
    pub fn get(&self, key: &JobKey) -> Option<ProgressState> {
        self.live
            .lock()
            .expect("MemoryBackend lock poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self, key: &JobKey) -> Result<Option<ProgressState>> {
        Ok(self.get(key))
    }

    async fn save(&self, state: &ProgressState) -> Result<()> {
        self.live
            .lock()
            .expect("MemoryBackend lock poisoned")
            .insert(state.job_key.clone(), state.clone());
        Ok(())
    }

    async fn archive(&self, key: &JobKey) -> Result<()> {
        let removed = self
            .live
            .lock()
            .expect("MemoryBackend lock poisoned")
            .remove(key);
        if let Some(state) = removed {
            self.archived
                .lock()
                .expect("MemoryBackend lock poisoned")
                .push(state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobParameters;
    use gridscout_core::{Bounds, CanonicalId, CellKey, ScrapingMode};
    use tempfile::TempDir;

    fn state() -> ProgressState {
        let params = JobParameters {
            search_term: "cafe".to_string(),
            target_count: 5,
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0).expect("valid bounds"),
            grid_size: 2,
            max_per_cell: 10,
            zoom: 12,
            mode: ScrapingMode::Fast,
        };
        ProgressState::new(params.derived_key(), params)
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path().join("state"));
        let mut state = state();
        assert!(backend.load(&state.job_key).await.expect("load").is_none());

        state.completed_cells.insert(CellKey::new(1, 1));
        state.seen_ids.insert(CanonicalId::new("ChIJa").expect("id"));
        state.accepted_count = 1;
        backend.save(&state).await.expect("save");

        let loaded = backend
            .load(&state.job_key)
            .await
            .expect("load")
            .expect("state present");
        assert_eq!(loaded, state);
        assert!(backend.state_path(&state.job_key).exists());
    }

    #[tokio::test]
    async fn test_stray_temp_file_is_ignored() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path());
        let state = state();
        backend.save(&state).await.expect("save");

        // A write that died before the rename leaves only its temp file.
        std::fs::write(dir.path().join(".tmpABC123"), b"{ \"version\": 1, trunc")
            .expect("write stray temp");

        let loaded = backend.load(&state.job_key).await.expect("load");
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_document() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path());
        let state = state();
        backend.save(&state).await.expect("save");

        // Rename cannot replace a non-empty directory, so persisting to a
        // path occupied by one fails after the temp file was written.
        let mut other = state.clone();
        other.job_key = JobKey::new("blocked").expect("key");
        let blocked = backend.state_path(&other.job_key);
        std::fs::create_dir_all(blocked.join("occupied")).expect("create blocker");
        assert!(matches!(backend.save(&other).await, Err(StoreError::Io(_))));

        // The temp file was cleaned up and the existing document untouched.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected files: {names:?}");
        let loaded = backend.load(&state.job_key).await.expect("load");
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path());
        let key = state().job_key;
        std::fs::write(backend.state_path(&key), b"not json").expect("write");
        assert!(matches!(
            backend.load(&key).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path());
        let mut state = state();
        state.version = 42;
        backend.save(&state).await.expect("save");
        assert!(matches!(
            backend.load(&state.job_key).await,
            Err(StoreError::UnsupportedVersion { found: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_file_archive() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = FileBackend::new(dir.path());
        let state = state();
        backend.save(&state).await.expect("save");
        backend.archive(&state.job_key).await.expect("archive");

        assert!(backend.load(&state.job_key).await.expect("load").is_none());
        let archived: Vec<_> = std::fs::read_dir(backend.archive_dir())
            .expect("archive dir")
            .collect();
        assert_eq!(archived.len(), 1);

        // Nothing left to archive.
        backend.archive(&state.job_key).await.expect("archive again");
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        let state = state();
        backend.save(&state).await.expect("save");
        assert_eq!(backend.load(&state.job_key).await.expect("load"), Some(state.clone()));

        backend.archive(&state.job_key).await.expect("archive");
        assert!(backend.get(&state.job_key).is_none());
        assert_eq!(backend.archived(), vec![state]);
    }
}
