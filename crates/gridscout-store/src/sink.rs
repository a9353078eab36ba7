//! Destinations for accepted records and their detail items.

use crate::error::Result;
use async_trait::async_trait;
use gridscout_agent::{CanonicalRecord, DetailItem};
use gridscout_core::{CanonicalId, JobKey};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Receives a job's output as it is produced.
///
/// Writes for one job are issued sequentially by the job's task.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one accepted record.
    async fn append_record(&mut self, record: &CanonicalRecord) -> Result<()>;

    /// Persist a batch of detail items belonging to `id`.
    async fn append_detail_batch(&mut self, id: &CanonicalId, items: &[DetailItem]) -> Result<()>;

    /// Flush everything; called once when the job completes.
    async fn finalize(&mut self) -> Result<()>;
}

/// Whether a sink continues or replaces earlier output for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Continue the output of a resumed job
    Append,
    /// Start a fresh output set; earlier output is set aside
    Replace,
}

/// Opens the sink for a job.
#[async_trait]
pub trait SinkProvider: Send + Sync {
    /// Sink for the job stored under `key`.
    async fn open(&self, key: &JobKey, mode: OutputMode) -> Result<Box<dyn RecordSink>>;
}

#[derive(Serialize)]
struct DetailLine<'a> {
    id: &'a CanonicalId,
    #[serde(flatten)]
    item: &'a DetailItem,
}

/// JSON-lines files: `<job_key>.records.jsonl` and `<job_key>.details.jsonl`.
#[derive(Debug)]
pub struct JsonlSink {
    records_path: PathBuf,
    records: File,
    details: File,
}

impl JsonlSink {
    /// Open the output files for `key` under `dir`.
    ///
    /// With [`OutputMode::Replace`], existing files are moved to
    /// `<dir>/archive/<key>-<timestamp>.{records,details}.jsonl` first.
    pub async fn open(dir: &Path, key: &JobKey, mode: OutputMode) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let records_path = dir.join(format!("{key}.records.jsonl"));
        let details_path = dir.join(format!("{key}.details.jsonl"));
        if mode == OutputMode::Replace {
            let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
            let archive = dir.join("archive");
            rotate(&records_path, &archive, &format!("{key}-{stamp}.records.jsonl")).await?;
            rotate(&details_path, &archive, &format!("{key}-{stamp}.details.jsonl")).await?;
        }
        Ok(Self {
            records: append_file(&records_path).await?,
            details: append_file(&details_path).await?,
            records_path,
        })
    }

    /// Path of the records file.
    #[must_use]
    pub fn records_path(&self) -> &Path {
        &self.records_path
    }
}

async fn rotate(path: &Path, archive: &Path, name: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(archive).await?;
    let target = archive.join(name);
    tokio::fs::rename(path, &target).await?;
    tracing::info!(from = %path.display(), to = %target.display(), "Set aside previous output");
    Ok(())
}

async fn append_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn append_record(&mut self, record: &CanonicalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.records.write_all(&line).await?;
        self.records.flush().await?;
        Ok(())
    }

    async fn append_detail_batch(&mut self, id: &CanonicalId, items: &[DetailItem]) -> Result<()> {
        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, &DetailLine { id, item })?;
            buf.push(b'\n');
        }
        self.details.write_all(&buf).await?;
        self.details.flush().await?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.records.sync_all().await?;
        self.details.sync_all().await?;
        tracing::debug!(path = %self.records_path.display(), "Finalized record output");
        Ok(())
    }
}

/// Provides [`JsonlSink`]s under one output directory.
#[derive(Debug, Clone)]
pub struct JsonlSinkProvider {
    dir: PathBuf,
}

impl JsonlSinkProvider {
    /// Provider writing under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SinkProvider for JsonlSinkProvider {
    async fn open(&self, key: &JobKey, mode: OutputMode) -> Result<Box<dyn RecordSink>> {
        Ok(Box::new(JsonlSink::open(&self.dir, key, mode).await?))
    }
}

/// Everything a [`MemorySink`] has received.
#[derive(Debug, Clone, Default)]
pub struct SinkContents {
    /// Records in append order
    pub records: Vec<CanonicalRecord>,
    /// Detail items per record
    pub details: HashMap<CanonicalId, Vec<DetailItem>>,
    /// Number of detail batches appended
    pub detail_batches: usize,
    /// Number of `finalize` calls
    pub finalized: usize,
}

/// In-memory sink sharing its contents with whoever created it.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    contents: Arc<Mutex<SinkContents>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of what has been written so far.
    pub fn contents(&self) -> SinkContents {
        self.contents
            .lock()
            .expect("MemorySink lock poisoned")
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append_record(&mut self, record: &CanonicalRecord) -> Result<()> {
        self.contents
            .lock()
            .expect("MemorySink lock poisoned")
            .records
            .push(record.clone());
        Ok(())
    }

    async fn append_detail_batch(&mut self, id: &CanonicalId, items: &[DetailItem]) -> Result<()> {
        let mut contents = self.contents.lock().expect("MemorySink lock poisoned");
        contents
            .details
            .entry(id.clone())
            .or_default()
            .extend_from_slice(items);
        contents.detail_batches += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.contents
            .lock()
            .expect("MemorySink lock poisoned")
            .finalized += 1;
        Ok(())
    }
}

/// Hands out one shared [`MemorySink`] per job key.
#[derive(Debug, Default)]
pub struct MemorySinkProvider {
    sinks: Mutex<HashMap<JobKey, MemorySink>>,
}

impl MemorySinkProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents written for `key`, if a sink was ever opened for it.
    pub fn contents(&self, key: &JobKey) -> Option<SinkContents> {
        self.sinks
            .lock()
            .expect("MemorySinkProvider lock poisoned")
            .get(key)
            .map(MemorySink::contents)
    }
}

#[async_trait]
impl SinkProvider for MemorySinkProvider {
    async fn open(&self, key: &JobKey, mode: OutputMode) -> Result<Box<dyn RecordSink>> {
        let mut sinks = self.sinks.lock().expect("MemorySinkProvider lock poisoned");
        if mode == OutputMode::Replace {
            sinks.remove(key);
        }
        let sink = sinks.entry(key.clone()).or_default().clone();
        Ok(Box::new(sink))
    }
}
