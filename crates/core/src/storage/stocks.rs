use crate::domain::recommendation::Recommendation;
use crate::domain::stock::ScoredRecord;
use crate::ingest::sync::SyncReport;
use crate::storage::{dedupe_latest, recommendations, StockStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Column list matching `StoredStock`'s fields.
pub const STOCK_COLUMNS: &str = "id, ticker, company, brokerage, action, rating_from, rating_to, \
     target_from, target_to, time, score, confidence, reason, current_rating, created_at, updated_at";

const DEFAULT_UPSERT_BATCH: usize = 200;

#[derive(Debug, Clone)]
pub struct PgStockStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgStockStore {
    pub fn new(pool: PgPool) -> Self {
        let chunk_size = std::env::var("STOCKS_UPSERT_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(DEFAULT_UPSERT_BATCH);
        Self { pool, chunk_size }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl StockStore for PgStockStore {
    fn store_name(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, records: &[ScoredRecord], now: DateTime<Utc>) -> anyhow::Result<u64> {
        upsert_scored_atomic(&self.pool, records, now, self.chunk_size).await
    }

    async fn record_sync_run(&self, report: &SyncReport) -> anyhow::Result<()> {
        record_sync_run(&self.pool, report).await
    }

    async fn best_recommendation(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Recommendation>> {
        recommendations::best_recommendation(&self.pool, now).await
    }
}

/// Upserts the batch inside one transaction; the first failing chunk rolls everything back.
pub async fn upsert_scored_atomic(
    pool: &PgPool,
    records: &[ScoredRecord],
    now: DateTime<Utc>,
    chunk_size: usize,
) -> anyhow::Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }
    anyhow::ensure!(chunk_size >= 1, "upsert chunk size must be >= 1");

    let latest = dedupe_latest(records);
    for record in &latest {
        record.validate()?;
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut affected: u64 = 0;
    for (batch_idx, chunk) in latest.chunks(chunk_size).enumerate() {
        let t0 = std::time::Instant::now();
        let res = upsert_statement(chunk, now)
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("batch upsert stocks failed (batch {})", batch_idx + 1))?;
        affected += res.rows_affected();

        tracing::debug!(
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "stocks batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;

    tracing::info!(
        received = records.len(),
        unique = latest.len(),
        affected,
        "stocks upsert committed"
    );
    Ok(affected)
}

fn upsert_statement<'a>(
    chunk: &'a [&'a ScoredRecord],
    now: DateTime<Utc>,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO stocks (ticker, company, brokerage, action, rating_from, rating_to, \
         target_from, target_to, time, score, confidence, reason, current_rating, created_at, updated_at) ",
    );
    qb.push_values(chunk, |mut b, record| {
        let e = &record.event;
        b.push_bind(e.ticker.as_str())
            .push_bind(e.company.as_str())
            .push_bind(e.brokerage.as_str())
            .push_bind(e.action.as_str())
            .push_bind(e.rating_from.as_str())
            .push_bind(e.rating_to.as_str())
            .push_bind(e.target_from.as_str())
            .push_bind(e.target_to.as_str())
            .push_bind(e.time)
            .push_bind(record.score)
            .push_bind(record.confidence)
            .push_bind(record.reason.as_str())
            .push_bind(record.current_rating.as_str())
            .push_bind(now)
            .push_bind(now);
    });
    // created_at stays out of SET. Rows whose content is unchanged are not rewritten, so
    // updated_at only moves when something did.
    qb.push(
        " ON CONFLICT (ticker, brokerage) DO UPDATE \
           SET company = EXCLUDED.company, action = EXCLUDED.action, \
               rating_from = EXCLUDED.rating_from, rating_to = EXCLUDED.rating_to, \
               target_from = EXCLUDED.target_from, target_to = EXCLUDED.target_to, \
               time = EXCLUDED.time, score = EXCLUDED.score, confidence = EXCLUDED.confidence, \
               reason = EXCLUDED.reason, current_rating = EXCLUDED.current_rating, \
               updated_at = EXCLUDED.updated_at \
         WHERE (stocks.company, stocks.action, stocks.rating_from, stocks.rating_to, \
                stocks.target_from, stocks.target_to, stocks.time, stocks.score, \
                stocks.confidence, stocks.reason, stocks.current_rating) \
               IS DISTINCT FROM \
               (EXCLUDED.company, EXCLUDED.action, EXCLUDED.rating_from, EXCLUDED.rating_to, \
                EXCLUDED.target_from, EXCLUDED.target_to, EXCLUDED.time, EXCLUDED.score, \
                EXCLUDED.confidence, EXCLUDED.reason, EXCLUDED.current_rating)",
    );
    qb
}

pub async fn record_sync_run(pool: &PgPool, report: &SyncReport) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO sync_runs (id, source, started_at, finished_at, status, fetched, stored, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(report.id)
    .bind(&report.source)
    .bind(report.started_at)
    .bind(report.finished_at)
    .bind(report.status.as_str())
    .bind(i64::try_from(report.fetched).unwrap_or(i64::MAX))
    .bind(i64::try_from(report.stored).unwrap_or(i64::MAX))
    .bind(report.error.as_deref())
    .execute(pool)
    .await
    .context("insert sync_runs failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stock::RatingEvent;
    use chrono::TimeZone;

    fn record(ticker: &str) -> ScoredRecord {
        let now = Utc.with_ymd_and_hms(2025, 5, 5, 0, 0, 0).unwrap();
        ScoredRecord::from_event(
            RatingEvent {
                ticker: ticker.into(),
                company: "Co".into(),
                brokerage: "Broker".into(),
                action: "reiterated by".into(),
                rating_from: "Buy".into(),
                rating_to: "Buy".into(),
                target_from: "$5".into(),
                target_to: "$6".into(),
                time: now,
            },
            now,
        )
    }

    #[test]
    fn upsert_binds_every_value_and_never_touches_created_at() {
        let a = record("AAPL");
        let b = record("MSFT");
        let chunk = vec![&a, &b];
        let qb = upsert_statement(&chunk, Utc::now());
        let sql = qb.sql();

        assert!(sql.contains("ON CONFLICT (ticker, brokerage) DO UPDATE"));
        assert!(sql.contains("$30"));
        assert!(!sql.contains("$31"));
        assert!(!sql.contains("AAPL"));

        let set_clause = &sql[sql.find(" SET ").unwrap()..sql.find(" WHERE ").unwrap()];
        assert!(!set_clause.contains("created_at"));
        assert!(set_clause.contains("updated_at = EXCLUDED.updated_at"));
    }
}
