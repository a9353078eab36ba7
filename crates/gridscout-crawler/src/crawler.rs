//! Per-cell crawl: fetch, identify, deduplicate, checkpoint, persist.

use crate::error::Result;
use crate::job::{CellBudget, JobConfig};
use gridscout_agent::{
    analyze_reviews, AgentError, CanonicalRecord, CellQuery, DetailPayload, ExtractionAgent,
    RawItem,
};
use gridscout_core::{CellKey, CrawlConfig};
use gridscout_grid::SearchCell;
use gridscout_store::{DeduplicationIndex, ProgressStore, RecordSink};
use std::sync::Arc;
use std::time::Duration;

/// Per-job crawl limits, resolved from the job and application config.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Query sent with every cell
    pub search_term: String,
    /// Raw listings requested and considered per cell
    pub max_per_cell: u32,
    /// Reviews fetched per accepted record; 0 disables detail fetches
    pub max_details: u32,
    /// Detail items per sink call
    pub detail_batch_size: usize,
    /// Accepted records buffered before a checkpoint
    pub checkpoint_every: usize,
    /// Bound on one agent call
    pub cell_timeout: Duration,
    /// Extra attempts after a transient failure
    pub cell_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_delay: Duration,
}

impl CrawlSettings {
    /// Resolve settings for `job`, taking crawl behaviour from `crawl`.
    #[must_use]
    pub fn new(job: &JobConfig, crawl: &CrawlConfig) -> Self {
        Self {
            search_term: job.search_term.trim().to_string(),
            max_per_cell: job.max_per_cell,
            max_details: job.max_details,
            detail_batch_size: crawl.detail_batch_size.max(1),
            checkpoint_every: crawl.checkpoint_every.max(1),
            cell_timeout: crawl.cell_timeout(),
            cell_retries: crawl.cell_retries,
            retry_delay: crawl.retry_delay(),
        }
    }
}

/// What happened in one cell.
#[derive(Debug, Clone)]
pub struct CellOutcome {
    /// Cell the outcome belongs to
    pub cell: CellKey,
    /// New records persisted
    pub accepted: u32,
    /// Listings dropped for a missing identifier or invalid payload
    pub skipped: u32,
    /// Listings whose identifier was already accepted
    pub duplicates: u32,
    /// Detail fetches that failed; the records were kept without metrics
    pub detail_failures: u32,
    /// Processing stopped because the cell's budget ran out
    pub stop: bool,
    /// The cell was marked completed: exhausted, or its coverage share filled
    pub completed: bool,
    /// Whole-cell agent failure; nothing from the cell was accepted
    pub error: Option<AgentError>,
}

impl CellOutcome {
    fn new(cell: CellKey) -> Self {
        Self {
            cell,
            accepted: 0,
            skipped: 0,
            duplicates: 0,
            detail_failures: 0,
            stop: false,
            completed: false,
            error: None,
        }
    }
}

struct PendingRecord {
    record: CanonicalRecord,
    details: Option<DetailPayload>,
}

/// Crawls one job's cells one at a time.
///
/// Owns the job's progress store, dedup index and sink for the duration of
/// the run.
pub struct CellCrawler {
    agent: Arc<dyn ExtractionAgent>,
    store: ProgressStore,
    index: DeduplicationIndex,
    sink: Box<dyn RecordSink>,
    settings: CrawlSettings,
    pending: Vec<PendingRecord>,
}

impl CellCrawler {
    /// Prepare a crawler, restoring the dedup index from the store.
    pub fn new(
        agent: Arc<dyn ExtractionAgent>,
        store: ProgressStore,
        sink: Box<dyn RecordSink>,
        settings: CrawlSettings,
    ) -> Self {
        let index = DeduplicationIndex::from_state(store.state());
        Self {
            agent,
            store,
            index,
            sink,
            settings,
            pending: Vec::new(),
        }
    }

    /// Progress store of the job being crawled.
    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Crawl `cell`, accepting at most `budget.limit` new records.
    ///
    /// The cell is marked completed when its listings run out, or when a
    /// share budget fills up. A cell cut short by the job target stays open.
    ///
    /// Agent failures are reported in the outcome; only persistence errors
    /// are returned as `Err`.
    pub async fn process(&mut self, cell: &SearchCell, budget: CellBudget) -> Result<CellOutcome> {
        let key = cell.key().clone();
        let mut outcome = CellOutcome::new(key.clone());

        let query = CellQuery {
            search_term: self.settings.search_term.clone(),
            center: cell.center(),
            zoom: cell.zoom(),
            cap: self.settings.max_per_cell,
        };
        let items = match self.fetch_with_retry(&query, &key).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(cell = %key, error = %e, "Cell abandoned");
                outcome.error = Some(e);
                return Ok(outcome);
            }
        };
        tracing::debug!(cell = %key, items = items.len(), budget = budget.limit, "Fetched cell");

        let cap = usize::try_from(self.settings.max_per_cell).unwrap_or(usize::MAX);
        for item in items.iter().take(cap) {
            let record = match CanonicalRecord::from_raw(item, key.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(cell = %key, error = %e, "Skipping listing");
                    outcome.skipped += 1;
                    continue;
                }
            };

            if self.index.seen(&record.id) {
                outcome.duplicates += 1;
                continue;
            }
            if u64::from(outcome.accepted) >= budget.limit {
                outcome.stop = true;
                break;
            }
            self.index.register(&record.id);
            self.store.record_accepted(&record.id, &key);
            outcome.accepted += 1;

            let details = self.fetch_details(item, &key, &mut outcome).await;
            let record = match &details {
                Some(payload) => {
                    let today = chrono::Utc::now().date_naive();
                    let metrics = analyze_reviews(&payload.items, payload.complete, today);
                    record.with_review_metrics(metrics)
                }
                None => record,
            };
            self.pending.push(PendingRecord { record, details });

            if self.pending.len() >= self.settings.checkpoint_every {
                self.checkpoint().await?;
            }
        }
        self.checkpoint().await?;

        if !outcome.stop || budget.completes_cell {
            self.store.mark_cell_completed(&key);
            self.store.save().await?;
            outcome.completed = true;
        }

        tracing::info!(
            cell = %key,
            accepted = outcome.accepted,
            duplicates = outcome.duplicates,
            skipped = outcome.skipped,
            completed = outcome.completed,
            "Cell processed"
        );
        Ok(outcome)
    }

    /// Save progress, then hand every buffered record to the sink.
    ///
    /// The seen-set reaches durable state before the records it covers.
    pub async fn checkpoint(&mut self) -> Result<()> {
        if self.store.is_dirty() {
            self.store.save().await?;
        }

        for pending in std::mem::take(&mut self.pending) {
            self.sink.append_record(&pending.record).await?;
            if let Some(payload) = pending.details {
                for batch in payload.items.chunks(self.settings.detail_batch_size) {
                    self.sink
                        .append_detail_batch(&pending.record.id, batch)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Checkpoint and save the state of a job that stops before finishing.
    pub async fn suspend(&mut self) -> Result<()> {
        self.store.save().await?;
        self.checkpoint().await
    }

    /// Finalize the sink and archive the progress state.
    pub async fn finish(mut self) -> Result<()> {
        self.checkpoint().await?;
        self.sink.finalize().await?;
        self.store.archive().await?;
        Ok(())
    }

    /// Fetch a cell, retrying transient navigation failures with linear
    /// backoff. Timeouts are not retried.
    async fn fetch_with_retry(
        &self,
        query: &CellQuery,
        key: &CellKey,
    ) -> gridscout_agent::Result<Vec<RawItem>> {
        let attempts = self.settings.cell_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let fetch = self.agent.fetch_cell(query);
            let result = match tokio::time::timeout(self.settings.cell_timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout(format!(
                    "cell {key} exceeded {:?}",
                    self.settings.cell_timeout
                ))),
            };

            match result {
                Ok(items) => return Ok(items),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.settings.retry_delay * attempt;
                    tracing::warn!(
                        cell = %key,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Fetch failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_details(
        &self,
        item: &RawItem,
        key: &CellKey,
        outcome: &mut CellOutcome,
    ) -> Option<DetailPayload> {
        if self.settings.max_details == 0 {
            return None;
        }

        let fetch = self.agent.fetch_details(item, self.settings.max_details);
        match tokio::time::timeout(self.settings.cell_timeout, fetch).await {
            Ok(Ok(mut payload)) => {
                payload.items = payload
                    .items
                    .into_iter()
                    .map(gridscout_agent::DetailItem::normalized)
                    .collect();
                Some(payload)
            }
            Ok(Err(e)) => {
                tracing::warn!(cell = %key, error = %e, "Detail fetch failed");
                outcome.detail_failures += 1;
                None
            }
            Err(_) => {
                tracing::warn!(cell = %key, "Detail fetch timed out");
                outcome.detail_failures += 1;
                None
            }
        }
    }
}
