mod common;

use common::{orchestrator, unit_bounds, wait_terminal, ScriptedAgent};
use gridscout_core::ScrapingMode;
use gridscout_crawler::{JobConfig, JobStatus};
use gridscout_store::{FileBackend, JsonlSinkProvider, MemorySinkProvider, StateBackend};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn job() -> JobConfig {
    JobConfig::new("cafe", 100, unit_bounds())
        .with_grid_size(2)
        .with_max_details(0)
}

#[tokio::test]
async fn test_resume_skips_completed_cells() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path()));
    let sinks = Arc::new(MemorySinkProvider::new());
    let key = job().job_key();

    // First run is interrupted after one cell.
    let shutdown = CancellationToken::new();
    let first_agent = Arc::new(
        ScriptedAgent::new(unit_bounds(), 2)
            .two_per_cell()
            .cancel_on_first_call(shutdown.clone()),
    );
    let orch = orchestrator(first_agent, backend.clone(), sinks.clone());
    let id = orch.start_with_cancel(job(), &shutdown).expect("start");
    let interrupted = wait_terminal(&orch, &id).await;
    assert_eq!(interrupted.status, JobStatus::Cancelled);
    assert_eq!(interrupted.current, 2);
    assert!(backend.state_path(&key).exists());

    // A new process picks up where the first left off.
    let second_agent = Arc::new(ScriptedAgent::new(unit_bounds(), 2).two_per_cell());
    let orch = orchestrator(second_agent.clone(), backend.clone(), sinks.clone());
    let id = orch.start(job()).expect("start");
    let done = wait_terminal(&orch, &id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.resumed);
    assert_eq!(done.cells_skipped, 1);
    assert_eq!(done.cells_processed, 3);
    assert_eq!(done.cells_completed, 4);
    assert_eq!(done.current, 8);
    assert_eq!(second_agent.calls(), ["1_2", "2_1", "2_2"]);

    let records = sinks.contents(&key).expect("sink opened").records;
    let unique: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(records.len(), 8);
    assert_eq!(unique.len(), 8);

    // Completion archives the state, so the next run starts fresh.
    assert!(!backend.state_path(&key).exists());
    assert!(backend.load(&key).await.expect("load").is_none());
}

#[tokio::test]
async fn test_resumed_ids_are_not_recounted() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path()));
    let sinks = Arc::new(MemorySinkProvider::new());

    let shutdown = CancellationToken::new();
    let first_agent = Arc::new(
        ScriptedAgent::new(unit_bounds(), 2)
            .cell("1_1", &["a", "b"])
            .cancel_on_first_call(shutdown.clone()),
    );
    let orch = orchestrator(first_agent, backend.clone(), sinks.clone());
    let id = orch.start_with_cancel(job(), &shutdown).expect("start");
    wait_terminal(&orch, &id).await;

    // The next cells return listings already collected.
    let second_agent = Arc::new(
        ScriptedAgent::new(unit_bounds(), 2)
            .cell("1_2", &["a", "c"])
            .cell("2_1", &["b"]),
    );
    let orch = orchestrator(second_agent, backend.clone(), sinks.clone());
    let id = orch.start(job()).expect("start");
    let done = wait_terminal(&orch, &id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.current, 3);
    assert_eq!(done.duplicates, 2);
}

#[tokio::test]
async fn test_resume_disabled_starts_over() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path()));
    let sinks = Arc::new(MemorySinkProvider::new());

    let shutdown = CancellationToken::new();
    let first_agent = Arc::new(
        ScriptedAgent::new(unit_bounds(), 2)
            .two_per_cell()
            .cancel_on_first_call(shutdown.clone()),
    );
    let orch = orchestrator(first_agent, backend.clone(), sinks.clone());
    let id = orch.start_with_cancel(job(), &shutdown).expect("start");
    wait_terminal(&orch, &id).await;

    let second_agent = Arc::new(ScriptedAgent::new(unit_bounds(), 2).two_per_cell());
    let orch = orchestrator(second_agent.clone(), backend.clone(), sinks.clone());
    let id = orch.start(job().with_resume(false)).expect("start");
    let done = wait_terminal(&orch, &id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert!(!done.resumed);
    assert_eq!(done.cells_skipped, 0);
    assert_eq!(done.current, 8);
    assert_eq!(second_agent.calls().len(), 4);
}

#[tokio::test]
async fn test_changed_search_does_not_resume() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path()));
    let sinks = Arc::new(MemorySinkProvider::new());
    let shared_key = gridscout_core::JobKey::new("shared").expect("key");

    let shutdown = CancellationToken::new();
    let first_agent = Arc::new(
        ScriptedAgent::new(unit_bounds(), 2)
            .two_per_cell()
            .cancel_on_first_call(shutdown.clone()),
    );
    let orch = orchestrator(first_agent, backend.clone(), sinks.clone());
    let id = orch
        .start_with_cancel(job().with_job_key(shared_key.clone()), &shutdown)
        .expect("start");
    wait_terminal(&orch, &id).await;

    // Same key, different search term: saved progress belongs to another job.
    let second_agent = Arc::new(ScriptedAgent::new(unit_bounds(), 2).two_per_cell());
    let orch = orchestrator(second_agent.clone(), backend.clone(), sinks);
    let config = JobConfig::new("bakery", 100, unit_bounds())
        .with_grid_size(2)
        .with_max_details(0)
        .with_job_key(shared_key);
    let id = orch.start(config).expect("start");
    let done = wait_terminal(&orch, &id).await;

    assert!(!done.resumed);
    assert_eq!(done.cells_skipped, 0);
    assert_eq!(second_agent.calls().len(), 4);
}

#[tokio::test]
async fn test_rerun_after_completion_does_not_duplicate_output() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path().join("state")));
    let out = dir.path().join("out");
    let sinks = Arc::new(JsonlSinkProvider::new(&out));
    let key = job().job_key();

    for _ in 0..2 {
        let agent = Arc::new(ScriptedAgent::new(unit_bounds(), 2).two_per_cell());
        let orch = orchestrator(agent, backend.clone(), sinks.clone());
        let id = orch.start(job()).expect("start");
        let done = wait_terminal(&orch, &id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(!done.resumed);
        assert_eq!(done.current, 8);
    }

    let text = std::fs::read_to_string(out.join(format!("{key}.records.jsonl"))).expect("records");
    let ids: Vec<String> = text
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["id"].as_str().expect("id").to_string()
        })
        .collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(unique.len(), 8);

    // The first run's output was set aside, not lost.
    let archived: Vec<String> = std::fs::read_dir(out.join("archive"))
        .expect("archive dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].ends_with(".records.jsonl"));
}

#[tokio::test]
async fn test_coverage_resume_skips_filled_cells() {
    let dir = TempDir::new().expect("temp dir");
    let backend = Arc::new(FileBackend::new(dir.path()));
    let sinks = Arc::new(MemorySinkProvider::new());
    let config = || {
        JobConfig::new("cafe", 4, unit_bounds())
            .with_grid_size(2)
            .with_max_details(0)
            .with_mode(ScrapingMode::Coverage)
    };
    let key = config().job_key();
    let scripted = || {
        ScriptedAgent::new(unit_bounds(), 2)
            .cell("1_1", &["a1", "a2", "a3"])
            .cell("1_2", &["b1", "b2", "b3"])
            .cell("2_1", &["c1", "c2", "c3"])
            .cell("2_2", &["d1", "d2", "d3"])
    };

    let shutdown = CancellationToken::new();
    let first_agent = Arc::new(scripted().cancel_on_first_call(shutdown.clone()));
    let orch = orchestrator(first_agent, backend.clone(), sinks.clone());
    let id = orch.start_with_cancel(config(), &shutdown).expect("start");
    let interrupted = wait_terminal(&orch, &id).await;
    assert_eq!(interrupted.status, JobStatus::Cancelled);
    assert_eq!(interrupted.cells_completed, 1);

    let second_agent = Arc::new(scripted());
    let orch = orchestrator(second_agent.clone(), backend.clone(), sinks.clone());
    let id = orch.start(config()).expect("start");
    let done = wait_terminal(&orch, &id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.cells_skipped, 1);
    assert_eq!(done.current, 4);
    assert_eq!(second_agent.calls(), ["1_2", "2_1", "2_2"]);

    let records = sinks.contents(&key).expect("sink opened").records;
    let cells: HashSet<_> = records.iter().map(|r| r.cell.clone()).collect();
    assert_eq!(records.len(), 4);
    assert_eq!(cells.len(), 4);
}
