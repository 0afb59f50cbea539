use crate::domain::recommendation::Recommendation;
use crate::domain::stock::StoredStock;
use crate::storage::stocks::STOCK_COLUMNS;
use crate::time::window::DayWindow;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;

/// Best positive-score row dated today, else yesterday's best; `None` when both days are empty.
pub async fn best_recommendation(
    pool: &sqlx::PgPool,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<Recommendation>> {
    let window = DayWindow::from_now(now);
    let candidates = fetch_candidates(pool, window).await?;
    Ok(select_best(&candidates, window))
}

async fn fetch_candidates(
    pool: &sqlx::PgPool,
    window: DayWindow,
) -> anyhow::Result<Vec<StoredStock>> {
    let sql = format!(
        "SELECT {STOCK_COLUMNS} FROM stocks \
         WHERE score > 0 AND (time AT TIME ZONE 'UTC')::date IN ($1, $2) \
         ORDER BY confidence DESC, score DESC, time DESC"
    );
    sqlx::query_as::<_, StoredStock>(&sql)
        .bind(window.today)
        .bind(window.yesterday)
        .fetch_all(pool)
        .await
        .context("select recommendation candidates failed")
}

pub fn select_best(candidates: &[StoredStock], window: DayWindow) -> Option<Recommendation> {
    if let Some(stock) = best_on(candidates, window.today) {
        return Some(Recommendation {
            as_of_date: window.today,
            fallback: false,
            stock: stock.clone(),
        });
    }

    best_on(candidates, window.yesterday).map(|stock| Recommendation {
        as_of_date: window.yesterday,
        fallback: true,
        stock: stock.clone(),
    })
}

fn best_on(candidates: &[StoredStock], day: NaiveDate) -> Option<&StoredStock> {
    candidates
        .iter()
        .filter(|s| s.score > 0.0 && s.time.date_naive() == day)
        .min_by(|a, b| rank_order(a, b))
}

/// Confidence desc, then score desc, then event time desc; id asc keeps ties deterministic.
fn rank_order(a: &StoredStock, b: &StoredStock) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.time.cmp(&a.time))
        .then_with(|| a.id.cmp(&b.id))
}
