use anyhow::Context;
use clap::Parser;
use ratewatch_core::ingest::provider::{FetchOptions, HttpFeedClient};
use ratewatch_core::shutdown::ShutdownListener;
use ratewatch_core::storage::lock::IngestLock;
use ratewatch_core::storage::memory::MemoryStockStore;
use ratewatch_core::storage::query::StockFilter;
use ratewatch_core::storage::stocks::PgStockStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod scheduler;

use scheduler::Scheduler;

const DEFAULT_INTERVAL_MINS: u64 = 40;

#[derive(Debug, Parser)]
#[command(name = "ratewatch_worker")]
struct Args {
    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,

    /// Fetch and score into an in-memory store; nothing is written to the database.
    #[arg(long)]
    dry_run: bool,

    /// Minutes between sync cycles. Defaults to SYNC_INTERVAL_MINS, then 40.
    #[arg(long)]
    interval_mins: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = ratewatch_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let interval = resolve_interval(args.interval_mins)?;
    let fetch = FetchOptions::from_env();
    let feed = HttpFeedClient::from_settings(&settings)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(ShutdownListener::install(), cancel.clone()));

    if args.dry_run {
        let store = MemoryStockStore::new();
        let scheduler = Scheduler::new(&feed, &store, fetch, interval, cancel);
        tracing::info!(dry_run = true, once = args.once, "worker starting");
        run(&scheduler, args.once).await;

        for row in store
            .list_stocks(&StockFilter::default(), chrono::Utc::now())
            .await
            .iter()
            .take(5)
        {
            tracing::info!(
                ticker = %row.stock.ticker,
                brokerage = %row.stock.brokerage,
                score = row.stock.score,
                confidence = row.stock.confidence,
                total = row.stats.total_count,
                "dry-run top row"
            );
        }
        return Ok(());
    }

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    ratewatch_core::storage::migrate(&pool).await?;

    let Some(lock) = IngestLock::try_acquire(&pool).await? else {
        tracing::warn!("ingest lock not acquired; another worker is running");
        return Ok(());
    };

    let store = PgStockStore::new(pool.clone());
    let scheduler = Scheduler::new(&feed, &store, fetch, interval, cancel);
    tracing::info!(
        interval_mins = interval.as_secs() / 60,
        once = args.once,
        "worker starting"
    );
    run(&scheduler, args.once).await;

    if let Err(err) = lock.release().await {
        tracing::warn!(error = %err, "ingest lock release failed");
    }
    pool.close().await;
    Ok(())
}

async fn run(scheduler: &Scheduler<'_>, once: bool) {
    if once {
        scheduler.tick().await;
    } else {
        scheduler.run().await;
    }
}

fn resolve_interval(arg: Option<u64>) -> anyhow::Result<Duration> {
    let mins = match arg {
        Some(m) => m,
        None => match std::env::var("SYNC_INTERVAL_MINS") {
            Ok(s) => s
                .parse::<u64>()
                .with_context(|| format!("SYNC_INTERVAL_MINS must be an integer (got {s})"))?,
            Err(_) => DEFAULT_INTERVAL_MINS,
        },
    };
    anyhow::ensure!(mins >= 1, "sync interval must be at least 1 minute (got {mins})");
    Ok(Duration::from_secs(mins * 60))
}

async fn cancel_on_shutdown_signal(signals: ShutdownListener, cancel: CancellationToken) {
    let signal = signals.recv().await;
    tracing::info!(signal, "shutdown requested");
    cancel.cancel();
}

fn init_sentry(settings: &ratewatch_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_interval_wins() {
        assert_eq!(resolve_interval(Some(5)).unwrap(), Duration::from_secs(300));
        assert!(resolve_interval(Some(0)).is_err());
    }
}
