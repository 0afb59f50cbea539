pub mod lock;
pub mod memory;
pub mod query;
pub mod recommendations;
pub mod stocks;

use crate::domain::recommendation::Recommendation;
use crate::domain::stock::ScoredRecord;
use crate::ingest::sync::SyncReport;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Latest-state store keyed by (ticker, brokerage).
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    fn store_name(&self) -> &'static str;

    /// Writes the whole batch or nothing. Returns the number of rows inserted or changed.
    async fn upsert(&self, records: &[ScoredRecord], now: DateTime<Utc>) -> anyhow::Result<u64>;

    async fn record_sync_run(&self, report: &SyncReport) -> anyhow::Result<()>;

    async fn best_recommendation(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Recommendation>>;
}

/// Collapses a batch to one record per key: the latest event time wins, and on a tie the record
/// that appears later in the feed. Output is ordered by key.
pub fn dedupe_latest(records: &[ScoredRecord]) -> Vec<&ScoredRecord> {
    let mut latest: BTreeMap<(&str, &str), &ScoredRecord> = BTreeMap::new();
    for record in records {
        latest
            .entry(record.key())
            .and_modify(|kept| {
                if record.event.time >= kept.event.time {
                    *kept = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stock::RatingEvent;
    use chrono::{Duration, TimeZone};

    fn record(ticker: &str, brokerage: &str, action: &str, age_days: i64) -> ScoredRecord {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        ScoredRecord::from_event(
            RatingEvent {
                ticker: ticker.into(),
                company: "Co".into(),
                brokerage: brokerage.into(),
                action: action.into(),
                rating_from: "Hold".into(),
                rating_to: "Buy".into(),
                target_from: "".into(),
                target_to: "".into(),
                time: now - Duration::days(age_days),
            },
            now,
        )
    }

    #[test]
    fn keeps_latest_event_per_key() {
        let batch = vec![
            record("AAPL", "Citi", "initiated by", 3),
            record("AAPL", "Citi", "upgraded by", 1),
            record("AAPL", "Citi", "reiterated by", 2),
            record("AAPL", "UBS", "downgraded by", 5),
        ];

        let out = dedupe_latest(&batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key(), ("AAPL", "Citi"));
        assert_eq!(out[0].event.action, "upgraded by");
        assert_eq!(out[1].key(), ("AAPL", "UBS"));
    }

    #[test]
    fn later_feed_position_wins_a_tie() {
        let batch = vec![
            record("TSLA", "BofA", "initiated by", 1),
            record("TSLA", "BofA", "target raised by", 1),
        ];
        let out = dedupe_latest(&batch);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.action, "target raised by");
    }
}
