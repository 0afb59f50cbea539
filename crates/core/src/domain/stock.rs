use crate::scoring;
use crate::scoring::scale::is_top_rating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One analyst rating change as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub ticker: String,
    #[serde(default)]
    pub company: String,
    pub brokerage: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub rating_from: String,
    #[serde(default)]
    pub rating_to: String,
    #[serde(default)]
    pub target_from: String,
    #[serde(default)]
    pub target_to: String,
    pub time: DateTime<Utc>,
}

/// A feed event annotated with its derived score. Rebuilt from the raw event on every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub event: RatingEvent,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
    pub current_rating: String,
}

impl ScoredRecord {
    pub fn from_event(mut event: RatingEvent, now: DateTime<Utc>) -> Self {
        event.ticker = event.ticker.trim().to_string();
        event.company = event.company.trim().to_string();
        event.brokerage = event.brokerage.trim().to_string();

        let scored = scoring::score_event(&event, now);
        Self {
            event,
            score: scored.score,
            confidence: scored.confidence,
            reason: scored.reason,
            current_rating: scored.current_rating,
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.event.ticker, &self.event.brokerage)
    }

    /// Blank tickers or brokerages are stored as-is; the feed owns key quality.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.score),
            "score out of range for {}: {}",
            self.event.ticker,
            self.score
        );
        Ok(())
    }
}

/// The persisted state for one (ticker, brokerage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredStock {
    pub id: i64,
    pub ticker: String,
    pub company: String,
    pub brokerage: String,
    pub action: String,
    pub rating_from: String,
    pub rating_to: String,
    pub target_from: String,
    pub target_to: String,
    pub time: DateTime<Utc>,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
    pub current_rating: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredStock {
    pub fn from_record(id: i64, record: &ScoredRecord, now: DateTime<Utc>) -> Self {
        let e = &record.event;
        Self {
            id,
            ticker: e.ticker.clone(),
            company: e.company.clone(),
            brokerage: e.brokerage.clone(),
            action: e.action.clone(),
            rating_from: e.rating_from.clone(),
            rating_to: e.rating_to.clone(),
            target_from: e.target_from.clone(),
            target_to: e.target_to.clone(),
            time: e.time,
            score: record.score,
            confidence: record.confidence,
            reason: record.reason.clone(),
            current_rating: record.current_rating.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True when `record` carries the same mutable content as this row.
    pub fn same_content(&self, record: &ScoredRecord) -> bool {
        let e = &record.event;
        self.company == e.company
            && self.action == e.action
            && self.rating_from == e.rating_from
            && self.rating_to == e.rating_to
            && self.target_from == e.target_from
            && self.target_to == e.target_to
            && self.time == e.time
            && self.score == record.score
            && self.confidence == record.confidence
            && self.reason == record.reason
            && self.current_rating == record.current_rating
    }

    /// Overwrites mutable fields; `created_at` is left alone.
    pub fn merge(&mut self, record: &ScoredRecord, now: DateTime<Utc>) {
        let e = &record.event;
        self.company = e.company.clone();
        self.action = e.action.clone();
        self.rating_from = e.rating_from.clone();
        self.rating_to = e.rating_to.clone();
        self.target_from = e.target_from.clone();
        self.target_to = e.target_to.clone();
        self.time = e.time;
        self.score = record.score;
        self.confidence = record.confidence;
        self.reason = record.reason.clone();
        self.current_rating = record.current_rating.clone();
        self.updated_at = now;
    }
}

/// Whole-store statistics attached to every query result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AggregateStats {
    pub total_count: i64,
    pub top_rated_count: i64,
    pub brokerage_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AggregateStats {
    pub fn collect(rows: &[StoredStock]) -> Self {
        let brokerages: BTreeSet<&str> = rows.iter().map(|r| r.brokerage.as_str()).collect();
        Self {
            total_count: rows.len() as i64,
            top_rated_count: rows.iter().filter(|r| is_top_rating(&r.current_rating)).count() as i64,
            brokerage_count: brokerages.len() as i64,
            last_updated: rows.iter().map(|r| r.updated_at).max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockRow {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub stock: StoredStock,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub stats: AggregateStats,
}
