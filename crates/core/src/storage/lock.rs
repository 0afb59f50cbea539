use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks belong to the session, so the lock holds on to the connection that took it.
const INGEST_LOCK_KEY: i64 = 0x5241_5445_5741_5443; // "RATEWATC"

/// Held by the one active ingestion scheduler.
#[derive(Debug)]
pub struct IngestLock {
    conn: PoolConnection<Postgres>,
}

impl IngestLock {
    /// `Ok(None)` when another process already holds the lock.
    pub async fn try_acquire(pool: &sqlx::PgPool) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("acquire connection for ingest lock failed")?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={INGEST_LOCK_KEY})"))?;

        Ok(acquired.0.then_some(Self { conn }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(INGEST_LOCK_KEY)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={INGEST_LOCK_KEY})"))?;
        Ok(())
    }
}
