//! In-process `StockStore` with the same write semantics as the Postgres store. Backs dry runs.

use crate::domain::recommendation::Recommendation;
use crate::domain::stock::{ScoredRecord, StockRow, StoredStock};
use crate::ingest::sync::SyncReport;
use crate::storage::query::{stabilize, StockFilter, StockQuery};
use crate::storage::recommendations::select_best;
use crate::storage::{dedupe_latest, StockStore};
use crate::time::window::DayWindow;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<(String, String), StoredStock>,
    next_id: i64,
    runs: Vec<SyncReport>,
}

#[derive(Debug, Default)]
pub struct MemoryStockStore {
    state: RwLock<MemoryState>,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows ordered by (ticker, brokerage).
    pub async fn snapshot(&self) -> Vec<StoredStock> {
        self.state.read().await.rows.values().cloned().collect()
    }

    pub async fn runs(&self) -> Vec<SyncReport> {
        self.state.read().await.runs.clone()
    }

    pub async fn list_stocks(&self, filter: &StockFilter, now: DateTime<Utc>) -> Vec<StockRow> {
        let rows = self.snapshot().await;
        let mut out = StockQuery::plan(filter, DayWindow::from_now(now)).evaluate(&rows);
        stabilize(&mut out);
        out
    }
}

#[async_trait::async_trait]
impl StockStore for MemoryStockStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, records: &[ScoredRecord], now: DateTime<Utc>) -> anyhow::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let latest = dedupe_latest(records);
        for record in &latest {
            record.validate()?;
        }

        // Validation happens before the lock so a bad record leaves the map untouched.
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut affected: u64 = 0;
        for record in latest {
            let (ticker, brokerage) = record.key();
            let key = (ticker.to_string(), brokerage.to_string());
            match state.rows.get_mut(&key) {
                Some(row) => {
                    if !row.same_content(record) {
                        row.merge(record, now);
                        affected += 1;
                    }
                }
                None => {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.rows.insert(key, StoredStock::from_record(id, record, now));
                    affected += 1;
                }
            }
        }

        tracing::debug!(affected, batch_size = records.len(), "memory upsert");
        Ok(affected)
    }

    async fn record_sync_run(&self, report: &SyncReport) -> anyhow::Result<()> {
        self.state.write().await.runs.push(report.clone());
        Ok(())
    }

    async fn best_recommendation(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Recommendation>> {
        let window = DayWindow::from_now(now);
        let state = self.state.read().await;
        let candidates: Vec<StoredStock> = state
            .rows
            .values()
            .filter(|row| window.is_today(row.time) || window.is_yesterday(row.time))
            .cloned()
            .collect();
        Ok(select_best(&candidates, window))
    }
}
