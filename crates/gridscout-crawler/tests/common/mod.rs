//! Scripted agent and helpers shared by the orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gridscout_agent::{
    AgentError, BusinessAttributes, CellQuery, DetailPayload, ExtractionAgent, RawItem,
};
use gridscout_core::{Bounds, CrawlConfig};
use gridscout_crawler::{JobOrchestrator, JobStatus, ProgressSnapshot};
use gridscout_grid::GridPartitioner;
use gridscout_store::{SinkProvider, StateBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub fn listing(id: &str) -> RawItem {
    RawItem {
        source_url: format!("https://www.google.com/maps/place/x/!19s{id}"),
        place_id: None,
        attributes: BusinessAttributes {
            name: format!("Business {id}"),
            ..BusinessAttributes::default()
        },
    }
}

pub fn unit_bounds() -> Bounds {
    Bounds::new(0.0, 0.0, 2.0, 2.0).expect("valid bounds")
}

pub enum CellScript {
    Items(Vec<RawItem>),
    Fail(AgentError),
}

/// Agent answering from a per-cell script. Unscripted cells are empty.
pub struct ScriptedAgent {
    grid: GridPartitioner,
    script: HashMap<String, CellScript>,
    calls: Mutex<Vec<String>>,
    cancel_on_first_call: Option<CancellationToken>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedAgent {
    pub fn new(bounds: Bounds, grid_size: u32) -> Self {
        Self {
            grid: GridPartitioner::new(bounds, grid_size, 12).expect("grid"),
            script: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            cancel_on_first_call: None,
            gate: None,
        }
    }

    pub fn cell(mut self, key: &str, ids: &[&str]) -> Self {
        let items = ids.iter().map(|id| listing(id)).collect();
        self.script.insert(key.to_string(), CellScript::Items(items));
        self
    }

    pub fn raw_cell(mut self, key: &str, items: Vec<RawItem>) -> Self {
        self.script.insert(key.to_string(), CellScript::Items(items));
        self
    }

    pub fn failing_cell(mut self, key: &str, error: AgentError) -> Self {
        self.script.insert(key.to_string(), CellScript::Fail(error));
        self
    }

    /// Two unique listings in every cell of the grid.
    pub fn two_per_cell(mut self) -> Self {
        let keys: Vec<String> = self.grid.cells().iter().map(|c| c.key().to_string()).collect();
        for key in keys {
            let ids = [format!("{key}-a"), format!("{key}-b")];
            let items = ids.iter().map(|id| listing(id)).collect();
            self.script.insert(key, CellScript::Items(items));
        }
        self
    }

    pub fn cancel_on_first_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_first_call = Some(token);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ExtractionAgent for ScriptedAgent {
    async fn fetch_cell(&self, query: &CellQuery) -> gridscout_agent::Result<Vec<RawItem>> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate open");
        }

        let key = self
            .grid
            .cell_containing(query.center)
            .expect("query inside the grid")
            .key()
            .to_string();
        let first = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(key.clone());
            calls.len() == 1
        };
        if first {
            if let Some(token) = &self.cancel_on_first_call {
                token.cancel();
            }
        }

        match self.script.get(&key) {
            Some(CellScript::Items(items)) => Ok(items.iter().take(query.cap as usize).cloned().collect()),
            Some(CellScript::Fail(error)) => Err(error.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_details(&self, _item: &RawItem, _max_items: u32) -> gridscout_agent::Result<DetailPayload> {
        Ok(DetailPayload {
            items: Vec::new(),
            complete: true,
        })
    }
}

pub fn fast_crawl() -> CrawlConfig {
    CrawlConfig {
        retry_delay_ms: 1,
        cell_timeout_secs: 5,
        ..CrawlConfig::default()
    }
}

pub fn orchestrator(
    agent: Arc<ScriptedAgent>,
    backend: Arc<dyn StateBackend>,
    sinks: Arc<dyn SinkProvider>,
) -> JobOrchestrator {
    JobOrchestrator::new(agent, backend, sinks).with_crawl_config(fast_crawl())
}

pub async fn wait_terminal(orchestrator: &JobOrchestrator, id: &gridscout_core::JobId) -> ProgressSnapshot {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait(id))
        .await
        .expect("job finished in time")
        .expect("job known")
}

pub async fn wait_for_status(orchestrator: &JobOrchestrator, id: &gridscout_core::JobId, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = orchestrator.snapshot(id).expect("job known").status;
            if current == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status reached in time");
}
