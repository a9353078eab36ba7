//! Job orchestrator for running crawl jobs in the background.
//!
//! This module provides the `JobOrchestrator` which owns the job table,
//! schedules jobs under a concurrency limit, drives each job's cells through
//! a [`CellCrawler`] and publishes progress snapshots.

use crate::crawler::{CellCrawler, CellOutcome, CrawlSettings};
use crate::error::{CrawlError, Result};
use crate::job::{JobConfig, JobStatus};
use crate::snapshot::{ProgressSnapshot, RunStats, SnapshotPublisher, SnapshotSubscription};
use chrono::Utc;
use futures::FutureExt;
use gridscout_agent::ExtractionAgent;
use gridscout_core::{AppConfig, CrawlConfig, JobId, OrchestratorConfig};
use gridscout_grid::{GridPartitioner, SearchCell};
use gridscout_store::{
    FileBackend, JsonlSinkProvider, OutputMode, ProgressStore, SinkProvider, StateBackend,
};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Selects jobs in [`JobOrchestrator::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs in this status
    pub status: Option<JobStatus>,
    /// Only jobs whose search term contains this, case-insensitively
    pub search_term: Option<String>,
    /// At most this many jobs
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, snapshot: &ProgressSnapshot) -> bool {
        if let Some(status) = self.status {
            if snapshot.status != status {
                return false;
            }
        }
        if let Some(term) = &self.search_term {
            if !snapshot
                .search_term
                .to_lowercase()
                .contains(&term.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// One entry of the job table.
struct JobEntry {
    seq: u64,
    cancel: CancellationToken,
    publisher: SnapshotPublisher,
}

type JobTable = RwLock<HashMap<JobId, Arc<JobEntry>>>;

/// Runs crawl jobs and tracks their progress.
pub struct JobOrchestrator {
    /// Extraction agent shared by all jobs
    agent: Arc<dyn ExtractionAgent>,
    /// Durable progress state
    backend: Arc<dyn StateBackend>,
    /// Output sinks
    sinks: Arc<dyn SinkProvider>,
    /// Per-cell crawl behaviour
    crawl: CrawlConfig,
    /// Scheduling and broadcast settings
    config: OrchestratorConfig,
    /// Cross-job concurrency limit
    permits: Arc<Semaphore>,
    /// All known jobs, running and finished
    jobs: JobTable,
    next_seq: AtomicU64,
}

impl JobOrchestrator {
    /// Create an orchestrator with default crawl and scheduling settings.
    #[must_use]
    pub fn new(
        agent: Arc<dyn ExtractionAgent>,
        backend: Arc<dyn StateBackend>,
        sinks: Arc<dyn SinkProvider>,
    ) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            agent,
            backend,
            sinks,
            crawl: CrawlConfig::default(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Orchestrator storing state and output where `app` configures them.
    pub fn from_config(agent: Arc<dyn ExtractionAgent>, app: &AppConfig) -> Result<Self> {
        let backend = Arc::new(FileBackend::new(app.state_dir()?));
        let sinks = Arc::new(JsonlSinkProvider::new(app.output_dir()?));
        Ok(Self::new(agent, backend, sinks)
            .with_crawl_config(app.crawl.clone())
            .with_config(app.orchestrator.clone()))
    }

    /// Set per-cell crawl behaviour.
    #[must_use]
    pub fn with_crawl_config(mut self, crawl: CrawlConfig) -> Self {
        self.crawl = crawl;
        self
    }

    /// Set scheduling and broadcast settings.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        self.config = config;
        self
    }

    /// Set the maximum number of jobs crawling at once.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Validate `config` and schedule the job, returning its ID immediately.
    ///
    /// Invalid configurations are rejected here and never enter the table.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, config: JobConfig) -> Result<JobId> {
        self.start_with_cancel(config, &CancellationToken::new())
    }

    /// Like [`start`](Self::start), additionally cancelling the job when
    /// `parent` is cancelled, e.g. a server shutdown token.
    pub fn start_with_cancel(&self, config: JobConfig, parent: &CancellationToken) -> Result<JobId> {
        config.validate()?;
        let grid = GridPartitioner::new(config.bounds, config.grid_size, config.zoom)?;

        let job_id = JobId::generate();
        let job_key = config.job_key();
        let initial = ProgressSnapshot::pending(
            job_id.clone(),
            job_key.clone(),
            config.search_term.trim(),
            config.target_count,
            u32::try_from(grid.len()).unwrap_or(u32::MAX),
        );
        let entry = Arc::new(JobEntry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            cancel: parent.child_token(),
            publisher: SnapshotPublisher::new(initial, self.config.snapshot_capacity),
        });

        self.jobs
            .write()
            .expect("RwLock poisoned - job table corrupted")
            .insert(job_id.clone(), entry.clone());

        tracing::info!(
            job_id = %job_id,
            job_key = %job_key,
            cells = grid.len(),
            target = config.target_count,
            mode = %config.mode,
            "Job scheduled"
        );

        let task = JobTask {
            job_id: job_id.clone(),
            config,
            cells: grid.cells().to_vec(),
            agent: self.agent.clone(),
            backend: self.backend.clone(),
            sinks: self.sinks.clone(),
            crawl: self.crawl.clone(),
            entry,
        };
        let permits = self.permits.clone();

        // Launch job execution in background
        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                () = task.entry.cancel.cancelled() => None,
            };
            match permit {
                Some(_permit) => {
                    let entry = task.entry.clone();
                    let job_id = task.job_id.clone();
                    if AssertUnwindSafe(task.run()).catch_unwind().await.is_err() {
                        fail_after_panic(&job_id, &entry);
                    }
                }
                None => task.cancel_pending(),
            }
        });

        Ok(job_id)
    }

    /// Request cancellation. The job stops at its next cell boundary.
    ///
    /// Returns `false` if the job is unknown or already finished.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let Some(entry) = self.entry(job_id) else {
            return false;
        };
        if entry.publisher.latest().is_terminal() {
            return false;
        }
        tracing::info!(job_id = %job_id, "Cancellation requested");
        entry.cancel.cancel();
        true
    }

    /// Latest snapshot of a job.
    pub fn snapshot(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        self.entry(job_id).map(|entry| entry.publisher.latest())
    }

    /// Snapshots of jobs matching `filter`, newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<ProgressSnapshot> {
        let mut entries: Vec<Arc<JobEntry>> = self
            .jobs
            .read()
            .expect("RwLock poisoned - job table corrupted")
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));

        entries
            .iter()
            .map(|entry| entry.publisher.latest())
            .filter(|snapshot| filter.matches(snapshot))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Live feed of a job's snapshots, starting with the current one.
    pub fn subscribe(&self, job_id: &JobId) -> Option<SnapshotSubscription> {
        self.entry(job_id).map(|entry| entry.publisher.subscribe())
    }

    /// Wait for a job to finish and return its terminal snapshot.
    pub async fn wait(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        let mut subscription = self.subscribe(job_id)?;
        let mut last = None;
        while let Some(snapshot) = subscription.next().await {
            let terminal = snapshot.is_terminal();
            last = Some(snapshot);
            if terminal {
                break;
            }
        }
        last
    }

    /// Drop finished jobs that ended more than `older_than` ago.
    ///
    /// Returns the number of jobs removed. Their progress state, if kept,
    /// stays on disk.
    pub fn remove_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut jobs = self
            .jobs
            .write()
            .expect("RwLock poisoned - job table corrupted");
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let snapshot = entry.publisher.latest();
            !snapshot
                .finished_at
                .is_some_and(|finished| finished <= cutoff)
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Removed finished jobs");
        }
        removed
    }

    /// Drop finished jobs older than the configured retention.
    pub fn remove_expired(&self) -> usize {
        self.remove_finished(Duration::from_secs(
            self.config.retain_finished_hours.saturating_mul(3600),
        ))
    }

    fn entry(&self, job_id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .expect("RwLock poisoned - job table corrupted")
            .get(job_id)
            .cloned()
    }
}

/// Everything a spawned job needs.
struct JobTask {
    job_id: JobId,
    config: JobConfig,
    cells: Vec<SearchCell>,
    agent: Arc<dyn ExtractionAgent>,
    backend: Arc<dyn StateBackend>,
    sinks: Arc<dyn SinkProvider>,
    crawl: CrawlConfig,
    entry: Arc<JobEntry>,
}

impl JobTask {
    /// Cancelled before a permit was granted.
    fn cancel_pending(&self) {
        let mut snapshot = self.entry.publisher.latest();
        let mut status = snapshot.status;
        if status.transition_to(JobStatus::Cancelled).is_ok() {
            let now = Utc::now();
            snapshot.status = status;
            snapshot.updated_at = now;
            snapshot.finished_at = Some(now);
            self.entry.publisher.publish(snapshot);
            tracing::info!(job_id = %self.job_id, "Job cancelled before start");
        }
    }

    async fn run(self) {
        let mut status = JobStatus::Pending;
        if let Err(e) = status.transition_to(JobStatus::Running) {
            tracing::error!(job_id = %self.job_id, error = %e, "Cannot start job");
            return;
        }
        let mut running = self.entry.publisher.latest();
        running.status = status;
        running.updated_at = Utc::now();
        self.entry.publisher.publish(running);

        let mut crawler = match self.open().await {
            Ok(crawler) => crawler,
            Err(e) => {
                self.fail_before_crawl(&mut status, &e);
                return;
            }
        };
        let mut stats = RunStats::new(crawler.store().state(), crawler.store().resumed());

        let result = self.crawl_cells(&mut crawler, &mut stats, status).await;
        let next = match result {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Job failed");
                stats.last_error = Some(e.to_string());
                JobStatus::Failed
            }
        };

        match next {
            JobStatus::Completed => {
                // The completed snapshot is published only once output is final.
                let state = crawler.store().state().clone();
                let next = match crawler.finish().await {
                    Ok(()) => JobStatus::Completed,
                    Err(e) => {
                        tracing::error!(job_id = %self.job_id, error = %e, "Finalizing output failed");
                        stats.last_error = Some(e.to_string());
                        JobStatus::Failed
                    }
                };
                self.publish_terminal(&mut status, next, &stats, &state);
            }
            JobStatus::Cancelled => {
                let next = match crawler.suspend().await {
                    Ok(()) => JobStatus::Cancelled,
                    Err(e) => {
                        tracing::error!(job_id = %self.job_id, error = %e, "Saving progress on cancel failed");
                        stats.last_error = Some(e.to_string());
                        JobStatus::Failed
                    }
                };
                let state = crawler.store().state().clone();
                self.publish_terminal(&mut status, next, &stats, &state);
            }
            other => {
                let state = crawler.store().state().clone();
                self.publish_terminal(&mut status, other, &stats, &state);
            }
        }
    }

    async fn open(&self) -> Result<CellCrawler> {
        let store = ProgressStore::open(
            self.backend.clone(),
            self.config.job_key(),
            self.config.parameters(),
            self.config.resume,
        )
        .await?;
        let mode = if store.resumed() {
            OutputMode::Append
        } else {
            OutputMode::Replace
        };
        let sink = self.sinks.open(store.job_key(), mode).await?;
        let settings = CrawlSettings::new(&self.config, &self.crawl);
        Ok(CellCrawler::new(self.agent.clone(), store, sink, settings))
    }

    /// Walk the cells in grid order; returns the status the job should end in.
    async fn crawl_cells(
        &self,
        crawler: &mut CellCrawler,
        stats: &mut RunStats,
        status: JobStatus,
    ) -> Result<JobStatus> {
        let pending: Vec<&SearchCell> = self
            .cells
            .iter()
            .filter(|cell| !crawler.store().is_cell_completed(cell.key()))
            .collect();
        stats.cells_skipped = u32::try_from(self.cells.len() - pending.len()).unwrap_or(u32::MAX);
        if stats.cells_skipped > 0 {
            tracing::info!(
                job_id = %self.job_id,
                skipped = stats.cells_skipped,
                "Skipping cells completed in a previous run"
            );
        }
        self.publish(stats, status, crawler);

        for cell in pending {
            if self.entry.cancel.is_cancelled() {
                tracing::info!(job_id = %self.job_id, cell = %cell.key(), "Job cancelled");
                return Ok(JobStatus::Cancelled);
            }
            let remaining = crawler.store().state().remaining();
            if remaining == 0 {
                break;
            }

            let budget = self.config.cell_budget(remaining);
            let outcome = crawler.process(cell, budget).await?;
            Self::absorb(stats, &outcome);
            self.publish(stats, status, crawler);
        }

        tracing::info!(
            job_id = %self.job_id,
            accepted = crawler.store().state().accepted_count,
            target = self.config.target_count,
            "Job finished crawling"
        );
        Ok(JobStatus::Completed)
    }

    fn absorb(stats: &mut RunStats, outcome: &CellOutcome) {
        stats.cells_processed += 1;
        stats.soft_skips += u64::from(outcome.skipped);
        stats.duplicates += u64::from(outcome.duplicates);
        stats.detail_failures += u64::from(outcome.detail_failures);
        if let Some(e) = &outcome.error {
            stats.cells_failed += 1;
            stats.last_error = Some(format!("cell {}: {e}", outcome.cell));
        }
    }

    fn publish(&self, stats: &RunStats, status: JobStatus, crawler: &CellCrawler) {
        let previous = self.entry.publisher.latest();
        let snapshot = stats.snapshot(&previous, status, crawler.store().state());
        self.entry.publisher.publish(snapshot);
    }

    fn publish_terminal(
        &self,
        status: &mut JobStatus,
        next: JobStatus,
        stats: &RunStats,
        state: &gridscout_store::ProgressState,
    ) {
        if let Err(e) = status.transition_to(next) {
            tracing::error!(job_id = %self.job_id, error = %e, "Invalid final transition");
            return;
        }
        let previous = self.entry.publisher.latest();
        let snapshot = stats.snapshot(&previous, *status, state);
        tracing::info!(
            job_id = %self.job_id,
            status = %snapshot.status,
            current = snapshot.current,
            cells_completed = snapshot.cells_completed,
            "Job ended"
        );
        self.entry.publisher.publish(snapshot);
    }

    /// The store or sink could not be opened.
    fn fail_before_crawl(&self, status: &mut JobStatus, error: &CrawlError) {
        tracing::error!(job_id = %self.job_id, error = %error, "Job failed to start");
        if status.transition_to(JobStatus::Failed).is_err() {
            return;
        }
        let mut snapshot = self.entry.publisher.latest();
        let now = Utc::now();
        snapshot.status = *status;
        snapshot.last_error = Some(error.to_string());
        snapshot.updated_at = now;
        snapshot.finished_at = Some(now);
        self.entry.publisher.publish(snapshot);
    }
}

/// The job task panicked; end the job so waiters and subscribers are released.
fn fail_after_panic(job_id: &JobId, entry: &JobEntry) {
    let mut snapshot = entry.publisher.latest();
    if snapshot.is_terminal() {
        return;
    }
    tracing::error!(job_id = %job_id, status = %snapshot.status, "Job task panicked");
    if let Err(e) = snapshot.status.transition_to(JobStatus::Failed) {
        tracing::error!(job_id = %job_id, error = %e, "Invalid final transition");
        return;
    }
    let now = Utc::now();
    snapshot.last_error = Some("job task panicked".to_string());
    snapshot.eta_secs = None;
    snapshot.updated_at = now;
    snapshot.finished_at = Some(now);
    entry.publisher.publish(snapshot);
}
