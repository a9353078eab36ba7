//! Progress snapshots and their broadcast to subscribers.
//!
//! Each job has one [`SnapshotPublisher`]. Publishing never waits on
//! subscribers: a subscriber that falls more than the channel capacity behind
//! skips the snapshots it missed and continues from the newest. After the
//! terminal snapshot the channel is closed, so every subscription ends.

use crate::job::JobStatus;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use gridscout_core::{JobId, JobKey};
use gridscout_store::{CellDistribution, ProgressState};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job this snapshot describes
    pub job_id: JobId,
    /// Key the job's progress is stored under
    pub job_key: JobKey,
    /// Query the job searches for
    pub search_term: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Accepted records, including those from resumed runs
    pub current: u64,
    /// Unique records the job aims for
    pub target: u32,
    /// `current / target` as a percentage, capped at 100
    pub percentage: f64,
    /// Cells in the grid
    pub cells_total: u32,
    /// Cells marked completed, including those from resumed runs
    pub cells_completed: u32,
    /// Cells abandoned on an agent error in this run
    pub cells_failed: u32,
    /// Cells skipped because saved progress already had them completed
    pub cells_skipped: u32,
    /// Cells crawled in this run, whether completed, truncated or failed
    pub cells_processed: u32,
    /// Seconds since this run started
    pub elapsed_secs: f64,
    /// Estimated time to finish; `None` before the first cell or once done
    pub eta_secs: Option<f64>,
    /// Accepted records per completed cell
    pub distribution: CellDistribution,
    /// Listings dropped for a missing identifier or invalid payload
    pub soft_skips: u64,
    /// Listings dropped because their identifier was already accepted
    pub duplicates: u64,
    /// Detail fetches that failed
    pub detail_failures: u64,
    /// Most recent cell or job error
    pub last_error: Option<String>,
    /// Whether this run continued saved progress
    pub resumed: bool,
    /// When the job was scheduled
    pub created_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Snapshot of a job that has not started.
    pub(crate) fn pending(job_id: JobId, job_key: JobKey, search_term: &str, target: u32, cells_total: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            job_key,
            search_term: search_term.to_string(),
            status: JobStatus::Pending,
            current: 0,
            target,
            percentage: 0.0,
            cells_total,
            cells_completed: 0,
            cells_failed: 0,
            cells_skipped: 0,
            cells_processed: 0,
            elapsed_secs: 0.0,
            eta_secs: None,
            distribution: CellDistribution::default(),
            soft_skips: 0,
            duplicates: 0,
            detail_failures: 0,
            last_error: None,
            resumed: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Whether the job has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Counters for one run of a job, folded into snapshots.
#[derive(Debug)]
pub(crate) struct RunStats {
    started: Instant,
    accepted_at_start: u64,
    pub(crate) resumed: bool,
    pub(crate) cells_skipped: u32,
    pub(crate) cells_processed: u32,
    pub(crate) cells_failed: u32,
    pub(crate) soft_skips: u64,
    pub(crate) duplicates: u64,
    pub(crate) detail_failures: u64,
    pub(crate) last_error: Option<String>,
}

impl RunStats {
    pub(crate) fn new(state: &ProgressState, resumed: bool) -> Self {
        Self {
            started: Instant::now(),
            accepted_at_start: state.accepted_count,
            resumed,
            cells_skipped: 0,
            cells_processed: 0,
            cells_failed: 0,
            soft_skips: 0,
            duplicates: 0,
            detail_failures: 0,
            last_error: None,
        }
    }

    /// Build the next snapshot from `previous` and the current state.
    pub(crate) fn snapshot(
        &self,
        previous: &ProgressSnapshot,
        status: JobStatus,
        state: &ProgressState,
    ) -> ProgressSnapshot {
        let now = Utc::now();
        let elapsed = self.started.elapsed().as_secs_f64();
        let target = state.parameters.target_count;
        let current = state.accepted_count;

        #[allow(clippy::cast_precision_loss)]
        let percentage = if target == 0 {
            100.0
        } else {
            ((current as f64 * 100.0 / f64::from(target)).min(100.0) * 10.0).round() / 10.0
        };

        let eta_secs = if status.is_terminal() {
            None
        } else {
            self.estimate_remaining(elapsed, previous.cells_total, state)
        };

        ProgressSnapshot {
            status,
            current,
            target,
            percentage,
            cells_completed: u32::try_from(state.completed_cells.len()).unwrap_or(u32::MAX),
            cells_failed: self.cells_failed,
            cells_skipped: self.cells_skipped,
            cells_processed: self.cells_processed,
            elapsed_secs: (elapsed * 10.0).round() / 10.0,
            eta_secs,
            distribution: state.distribution(),
            soft_skips: self.soft_skips,
            duplicates: self.duplicates,
            detail_failures: self.detail_failures,
            last_error: self.last_error.clone(),
            resumed: self.resumed,
            updated_at: now,
            finished_at: status.is_terminal().then_some(now),
            ..previous.clone()
        }
    }

    /// Smaller of the cell-throughput and result-throughput estimates.
    #[allow(clippy::cast_precision_loss)]
    fn estimate_remaining(&self, elapsed: f64, cells_total: u32, state: &ProgressState) -> Option<f64> {
        let by_cells = (self.cells_processed > 0).then(|| {
            let left = cells_total.saturating_sub(self.cells_skipped + self.cells_processed);
            elapsed / f64::from(self.cells_processed) * f64::from(left)
        });

        let gained = state.accepted_count.saturating_sub(self.accepted_at_start);
        let by_results = (gained > 0).then(|| elapsed / gained as f64 * state.remaining() as f64);

        let estimate = match (by_cells, by_results) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        estimate.map(|secs| (secs * 10.0).round() / 10.0)
    }
}

struct PublisherState {
    latest: ProgressSnapshot,
    sender: Option<broadcast::Sender<ProgressSnapshot>>,
}

/// Latest snapshot of one job plus the channel fanning it out.
pub(crate) struct SnapshotPublisher {
    state: Mutex<PublisherState>,
}

impl SnapshotPublisher {
    pub(crate) fn new(initial: ProgressSnapshot, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(PublisherState {
                latest: initial,
                sender: Some(sender),
            }),
        }
    }

    /// Record and broadcast `snapshot`. A terminal snapshot closes the channel.
    pub(crate) fn publish(&self, snapshot: ProgressSnapshot) {
        let mut state = self.state.lock().expect("SnapshotPublisher lock poisoned");
        if state.latest.is_terminal() {
            tracing::warn!(job_id = %snapshot.job_id, "Ignoring snapshot for finished job");
            return;
        }

        let terminal = snapshot.is_terminal();
        state.latest = snapshot.clone();
        if let Some(sender) = &state.sender {
            // No receivers is fine; the latest snapshot is still kept.
            let _ = sender.send(snapshot);
        }
        if terminal {
            state.sender = None;
        }
    }

    pub(crate) fn latest(&self) -> ProgressSnapshot {
        self.state
            .lock()
            .expect("SnapshotPublisher lock poisoned")
            .latest
            .clone()
    }

    /// Subscription starting with the latest snapshot.
    pub(crate) fn subscribe(&self) -> SnapshotSubscription {
        let state = self.state.lock().expect("SnapshotPublisher lock poisoned");
        SnapshotSubscription {
            initial: Some(state.latest.clone()),
            receiver: state.sender.as_ref().map(broadcast::Sender::subscribe),
        }
    }
}

/// A live feed of one job's snapshots.
///
/// Yields the snapshot current at subscription time, then every later one,
/// and ends after the terminal snapshot.
#[derive(Debug)]
pub struct SnapshotSubscription {
    initial: Option<ProgressSnapshot>,
    receiver: Option<broadcast::Receiver<ProgressSnapshot>>,
}

impl SnapshotSubscription {
    /// Next snapshot, or `None` once the job has finished and everything
    /// was delivered.
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if let Some(initial) = self.initial.take() {
            if initial.is_terminal() {
                self.receiver = None;
            }
            return Some(initial);
        }

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => {
                    if snapshot.is_terminal() {
                        self.receiver = None;
                    }
                    return Some(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Snapshot subscriber lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Adapt into a [`Stream`], e.g. for forwarding as server-sent events.
    pub fn into_stream(self) -> impl Stream<Item = ProgressSnapshot> + Send {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|snapshot| (snapshot, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn pending() -> ProgressSnapshot {
        ProgressSnapshot::pending(
            JobId::generate(),
            JobKey::new("test-job").expect("key"),
            "cafe",
            10,
            4,
        )
    }

    fn with_status(base: &ProgressSnapshot, status: JobStatus, current: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            status,
            current,
            ..base.clone()
        }
    }

    #[tokio::test]
    async fn test_subscription_ends_after_terminal() {
        let initial = pending();
        let publisher = SnapshotPublisher::new(initial.clone(), 8);
        let mut sub = publisher.subscribe();

        publisher.publish(with_status(&initial, JobStatus::Running, 1));
        publisher.publish(with_status(&initial, JobStatus::Completed, 2));

        let statuses: Vec<JobStatus> = sub_statuses(&mut sub).await;
        assert_eq!(
            statuses,
            [JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
        assert!(sub.next().await.is_none());
    }

    async fn sub_statuses(sub: &mut SnapshotSubscription) -> Vec<JobStatus> {
        let mut out = Vec::new();
        while let Some(snapshot) = sub.next().await {
            out.push(snapshot.status);
        }
        out
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let initial = pending();
        let publisher = SnapshotPublisher::new(initial.clone(), 2);
        let sub = publisher.subscribe();

        for i in 1..=10 {
            publisher.publish(with_status(&initial, JobStatus::Running, i));
        }
        publisher.publish(with_status(&initial, JobStatus::Completed, 11));

        let seen: Vec<ProgressSnapshot> = sub.into_stream().collect().await;
        assert_eq!(seen.first().map(|s| s.status), Some(JobStatus::Pending));
        let last = seen.last().expect("terminal snapshot");
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.current, 11);
        assert!(seen.len() < 12);
    }

    #[tokio::test]
    async fn test_subscribe_after_finish() {
        let initial = pending();
        let publisher = SnapshotPublisher::new(initial.clone(), 4);
        publisher.publish(with_status(&initial, JobStatus::Cancelled, 0));

        // Late publishes are ignored.
        publisher.publish(with_status(&initial, JobStatus::Running, 5));
        assert_eq!(publisher.latest().status, JobStatus::Cancelled);

        let mut sub = publisher.subscribe();
        assert_eq!(
            sub.next().await.map(|s| s.status),
            Some(JobStatus::Cancelled)
        );
        assert!(sub.next().await.is_none());
    }
}
