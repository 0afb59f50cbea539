use chrono::Utc;
use ratewatch_core::ingest::error::FeedError;
use ratewatch_core::ingest::provider::{FeedSource, FetchOptions};
use ratewatch_core::ingest::sync::sync_once;
use ratewatch_core::storage::StockStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives fetch → score → persist cycles back to back with a fixed pause in between.
///
/// Cycles never overlap and a failed cycle is not retried; the next attempt is the next tick.
pub struct Scheduler<'a> {
    feed: &'a dyn FeedSource,
    store: &'a dyn StockStore,
    fetch: FetchOptions,
    interval: Duration,
    cancel: CancellationToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        feed: &'a dyn FeedSource,
        store: &'a dyn StockStore,
        fetch: FetchOptions,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            store,
            fetch,
            interval,
            cancel,
        }
    }

    /// Runs until the token is cancelled. Returns the number of cycles attempted.
    pub async fn run(&self) -> u64 {
        let mut cycles: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.tick().await;
            cycles += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(cycles, "scheduler stopped");
        cycles
    }

    /// One cycle. Failures are logged and reported, never propagated.
    pub async fn tick(&self) -> bool {
        let now = Utc::now();
        let t0 = std::time::Instant::now();

        match sync_once(self.feed, self.store, &self.fetch, &self.cancel, now).await {
            Ok(report) => {
                tracing::info!(
                    run_id = %report.id,
                    store = self.store.store_name(),
                    fetched = report.fetched,
                    stored = report.stored,
                    elapsed_ms = t0.elapsed().as_millis(),
                    "sync cycle completed"
                );
                self.log_best(now).await;
                true
            }
            Err(err) => {
                let cancelled = err
                    .downcast_ref::<FeedError>()
                    .is_some_and(FeedError::is_cancelled);
                if cancelled {
                    tracing::info!("sync cycle cancelled");
                } else {
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(
                        error = %format!("{err:#}"),
                        elapsed_ms = t0.elapsed().as_millis(),
                        "sync cycle failed; waiting for next tick"
                    );
                }
                false
            }
        }
    }

    async fn log_best(&self, now: chrono::DateTime<Utc>) {
        match self.store.best_recommendation(now).await {
            Ok(Some(rec)) => tracing::info!(
                ticker = %rec.stock.ticker,
                brokerage = %rec.stock.brokerage,
                score = rec.stock.score,
                confidence = rec.stock.confidence,
                as_of_date = %rec.as_of_date,
                fallback = rec.fallback,
                "current best recommendation"
            ),
            Ok(None) => tracing::info!("no recommendation for today or yesterday"),
            Err(err) => tracing::warn!(error = %err, "best recommendation lookup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch_core::domain::stock::RatingEvent;
    use ratewatch_core::ingest::error::FetchFailure;
    use ratewatch_core::ingest::types::FeedPage;
    use ratewatch_core::storage::memory::MemoryStockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Single-page feed that cancels the scheduler after a set number of calls.
    struct CountingFeed {
        calls: AtomicUsize,
        cancel_after: usize,
        cancel: CancellationToken,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl FeedSource for CountingFeed {
        fn source_name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, _cursor: Option<&str>) -> Result<FeedPage, FetchFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.cancel_after {
                self.cancel.cancel();
            }
            if self.fail {
                return Err(FetchFailure::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(FeedPage {
                items: vec![RatingEvent {
                    ticker: "AAPL".into(),
                    company: "Apple Inc.".into(),
                    brokerage: "Citi".into(),
                    action: "upgraded by".into(),
                    rating_from: "Hold".into(),
                    rating_to: "Buy".into(),
                    target_from: "$150".into(),
                    target_to: "$180".into(),
                    time: Utc::now(),
                }],
                next_page: None,
            })
        }
    }

    fn fast() -> FetchOptions {
        FetchOptions {
            max_items: 1000,
            page_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn failed_cycles_do_not_stop_the_loop() {
        let cancel = CancellationToken::new();
        let feed = CountingFeed {
            calls: AtomicUsize::new(0),
            cancel_after: 3,
            cancel: cancel.clone(),
            fail: true,
        };
        let store = MemoryStockStore::new();
        let scheduler = Scheduler::new(&feed, &store, fast(), Duration::from_millis(1), cancel);

        assert_eq!(scheduler.run().await, 3);
        assert!(store.snapshot().await.is_empty());
        assert_eq!(store.runs().await.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let cancel = CancellationToken::new();
        let feed = CountingFeed {
            calls: AtomicUsize::new(0),
            cancel_after: usize::MAX,
            cancel: cancel.clone(),
            fail: false,
        };
        let store = MemoryStockStore::new();
        let scheduler = Scheduler::new(
            &feed,
            &store,
            fast(),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let cycles = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler did not stop after cancellation");
        assert_eq!(cycles, 1);
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn tick_reports_success() {
        let cancel = CancellationToken::new();
        let feed = CountingFeed {
            calls: AtomicUsize::new(0),
            cancel_after: usize::MAX,
            cancel: cancel.clone(),
            fail: false,
        };
        let store = MemoryStockStore::new();
        let scheduler = Scheduler::new(&feed, &store, fast(), Duration::from_secs(1), cancel);

        assert!(scheduler.tick().await);
        let rec = store.best_recommendation(Utc::now()).await.unwrap().unwrap();
        assert_eq!(rec.stock.ticker, "AAPL");
        assert!(!rec.fallback);
    }
}
