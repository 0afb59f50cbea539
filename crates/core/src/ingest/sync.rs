use crate::domain::stock::ScoredRecord;
use crate::ingest::provider::{fetch_all, FeedSource, FetchOptions};
use crate::storage::StockStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Outcome of one fetch → score → persist cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub fetched: usize,
    pub stored: u64,
    pub error: Option<String>,
}

/// Runs one full cycle. `now` is the reference time for scoring and for the write timestamps.
///
/// The run is recorded in the store whether it succeeds or not; failing to record it is only
/// logged.
pub async fn sync_once(
    feed: &dyn FeedSource,
    store: &dyn StockStore,
    opts: &FetchOptions,
    cancel: &CancellationToken,
    now: DateTime<Utc>,
) -> anyhow::Result<SyncReport> {
    let started_at = Utc::now();
    let mut fetched: usize = 0;

    let result: anyhow::Result<u64> = async {
        let events = fetch_all(feed, opts, cancel)
            .await
            .context("fetch rating events failed")?;
        fetched = events.len();
        tracing::info!(source = feed.source_name(), fetched, "feed fetched");

        let records: Vec<ScoredRecord> = events
            .into_iter()
            .map(|event| ScoredRecord::from_event(event, now))
            .collect();

        store
            .upsert(&records, now)
            .await
            .with_context(|| format!("upsert of {} scored records failed", records.len()))
    }
    .await;

    let report = SyncReport {
        id: Uuid::new_v4(),
        source: feed.source_name().to_string(),
        started_at,
        finished_at: Utc::now(),
        status: if result.is_ok() {
            SyncStatus::Success
        } else {
            SyncStatus::Error
        },
        fetched,
        stored: *result.as_ref().unwrap_or(&0),
        error: result.as_ref().err().map(|e| format!("{e:#}")),
    };

    if let Err(err) = store.record_sync_run(&report).await {
        tracing::warn!(run_id = %report.id, error = %err, "failed to record sync run");
    }

    result.map(|_| report)
}
