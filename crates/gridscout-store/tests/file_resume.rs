//! Progress survives a process restart when kept in files.

use gridscout_core::{Bounds, CanonicalId, CellKey, ScrapingMode};
use gridscout_store::{DeduplicationIndex, FileBackend, JobParameters, ProgressStore, StateBackend};
use std::sync::Arc;
use tempfile::TempDir;

fn params(target: u32) -> JobParameters {
    JobParameters {
        search_term: "dentist".to_string(),
        target_count: target,
        bounds: Bounds::new(52.3, 4.7, 52.45, 5.05).expect("valid bounds"),
        grid_size: 3,
        max_per_cell: 40,
        zoom: 13,
        mode: ScrapingMode::Coverage,
    }
}

fn id(s: &str) -> CanonicalId {
    CanonicalId::new(s).expect("valid id")
}

#[tokio::test]
async fn test_resume_from_files_restores_everything() {
    let dir = TempDir::new().expect("create temp dir");
    let key = params(10).derived_key();

    {
        let backend: Arc<dyn StateBackend> = Arc::new(FileBackend::new(dir.path()));
        let mut store = ProgressStore::open(backend, key.clone(), params(10), true)
            .await
            .expect("open");
        for place in ["a", "b", "c"] {
            assert!(store.record_accepted(&id(place), &CellKey::new(1, 1)));
            store.save().await.expect("checkpoint");
        }
        store.mark_cell_completed(&CellKey::new(1, 1));
        store.save().await.expect("save");

        // Second cell interrupted after one checkpointed record.
        store.record_accepted(&id("d"), &CellKey::new(1, 2));
        store.save().await.expect("checkpoint");
    }

    let backend: Arc<dyn StateBackend> = Arc::new(FileBackend::new(dir.path()));
    let mut store = ProgressStore::open(backend, key, params(10), true)
        .await
        .expect("reopen");
    assert!(store.resumed());

    let state = store.state().clone();
    assert_eq!(state.accepted_count, 4);
    assert_eq!(state.seen_ids.len(), 4);
    assert!(store.is_cell_completed(&CellKey::new(1, 1)));
    assert!(!store.is_cell_completed(&CellKey::new(1, 2)));
    assert_eq!(state.cell_results[&CellKey::new(1, 2)], 1);

    // Re-processing the interrupted cell does not re-count what was saved.
    let mut index = DeduplicationIndex::from_state(&state);
    assert!(!index.register(&id("d")));
    assert!(!store.record_accepted(&id("d"), &CellKey::new(1, 2)));
    assert!(index.register(&id("e")));
    assert!(store.record_accepted(&id("e"), &CellKey::new(1, 2)));
    assert_eq!(store.state().accepted_count, 5);
    assert_eq!(store.state().accepted_count as usize, store.state().seen_ids.len());
}

#[tokio::test]
async fn test_archive_makes_next_run_fresh() {
    let dir = TempDir::new().expect("create temp dir");
    let key = params(2).derived_key();
    let backend: Arc<dyn StateBackend> = Arc::new(FileBackend::new(dir.path()));

    let mut store = ProgressStore::open(backend.clone(), key.clone(), params(2), true)
        .await
        .expect("open");
    store.record_accepted(&id("a"), &CellKey::new(1, 1));
    store.save().await.expect("save");
    store.archive().await.expect("archive");

    let store = ProgressStore::open(backend, key, params(2), true)
        .await
        .expect("reopen");
    assert!(!store.resumed());
    assert_eq!(store.state().accepted_count, 0);
    assert!(dir.path().join("archive").is_dir());
}
