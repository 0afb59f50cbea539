//! Read-side query composition over `stocks`.
//!
//! Caller input is parsed into a [`StockFilter`], planned into a [`StockQuery`] (typed clauses,
//! ordering, limit) and compiled once into a bound `QueryBuilder`. Column names only ever come
//! from [`Column`]; every caller-supplied value is a bind parameter.
//!
//! [`StockQuery::evaluate`] applies the same plan to rows held in memory.

use crate::domain::stock::{AggregateStats, StockRow, StoredStock};
use crate::scoring::scale::{NORMALIZED_RATING_SQL, TOP_RATING_LABELS};
use crate::storage::stocks::STOCK_COLUMNS;
use crate::time::window::DayWindow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::cmp::Ordering;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("stock query failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueryError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Ticker,
    Company,
    Brokerage,
    Action,
    RatingTo,
    Score,
    Confidence,
    Time,
    CreatedAt,
    UpdatedAt,
}

impl Column {
    fn sql(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Ticker => "ticker",
            Self::Company => "company",
            Self::Brokerage => "brokerage",
            Self::Action => "action",
            Self::RatingTo => "rating_to",
            Self::Score => "score",
            Self::Confidence => "confidence",
            Self::Time => "time",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    /// Whitelist of sortable names accepted from callers.
    pub fn parse_sortable(name: &str) -> Option<Self> {
        let col = match name.trim().to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "ticker" => Self::Ticker,
            "company" => Self::Company,
            "brokerage" => Self::Brokerage,
            "action" => Self::Action,
            "rating_to" => Self::RatingTo,
            "score" => Self::Score,
            "confidence" => Self::Confidence,
            "time" => Self::Time,
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            _ => return None,
        };
        Some(col)
    }

    fn text(self, row: &StoredStock) -> Option<&str> {
        match self {
            Self::Ticker => Some(&row.ticker),
            Self::Company => Some(&row.company),
            Self::Brokerage => Some(&row.brokerage),
            Self::Action => Some(&row.action),
            Self::RatingTo => Some(&row.rating_to),
            _ => None,
        }
    }

    fn number(self, row: &StoredStock) -> Option<f64> {
        match self {
            Self::Id => Some(row.id as f64),
            Self::Score => Some(row.score),
            Self::Confidence => Some(row.confidence),
            _ => None,
        }
    }

    /// Text columns compare bytewise, not by database collation.
    fn compare(self, a: &StoredStock, b: &StoredStock) -> Ordering {
        match self {
            Self::Id => a.id.cmp(&b.id),
            Self::Score => a.score.total_cmp(&b.score),
            Self::Confidence => a.confidence.total_cmp(&b.confidence),
            Self::Time => a.time.cmp(&b.time),
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            text => text.text(a).cmp(&text.text(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Raw query-string parameters, all optional strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockParams {
    pub ticker: Option<String>,
    pub company: Option<String>,
    pub brokerage: Option<String>,
    pub id: Option<String>,
    pub min_score: Option<String>,
    pub today: Option<String>,
    pub confidence_sort: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockFilter {
    pub ticker: Option<String>,
    pub company: Option<String>,
    pub brokerage: Option<String>,
    pub id: Option<i64>,
    pub min_score: Option<f64>,
    pub today: bool,
    pub confidence_sort: Option<SortOrder>,
    pub sort_by: Option<Column>,
    pub order: SortOrder,
    pub limit: Option<i64>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl StockFilter {
    pub fn from_params(p: &StockParams) -> Result<Self, QueryError> {
        let id = non_blank(&p.id)
            .map(|s| s.parse::<i64>().map_err(|e| QueryError::invalid("id", e.to_string())))
            .transpose()?;

        let min_score = non_blank(&p.min_score)
            .map(|s| match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ => Err(QueryError::invalid("min_score", format!("not a number: {s}"))),
            })
            .transpose()?;

        let limit = non_blank(&p.limit)
            .map(|s| s.parse::<i64>().map_err(|e| QueryError::invalid("limit", e.to_string())))
            .transpose()?;

        let sort_by = non_blank(&p.sort_by)
            .map(|s| {
                Column::parse_sortable(s)
                    .ok_or_else(|| QueryError::invalid("sort_by", format!("unknown field: {s}")))
            })
            .transpose()?;

        let order = non_blank(&p.order)
            .map(|s| {
                SortOrder::parse(s)
                    .ok_or_else(|| QueryError::invalid("order", "expected asc or desc"))
            })
            .transpose()?
            .unwrap_or_default();

        let confidence_sort = non_blank(&p.confidence_sort)
            .map(|s| {
                SortOrder::parse(s)
                    .ok_or_else(|| QueryError::invalid("confidence_sort", "expected asc or desc"))
            })
            .transpose()?;

        let today = non_blank(&p.today).is_some_and(|s| s.eq_ignore_ascii_case("true"));

        Ok(Self {
            ticker: non_blank(&p.ticker).map(str::to_string),
            company: non_blank(&p.company).map(str::to_string),
            brokerage: non_blank(&p.brokerage).map(str::to_string),
            id,
            min_score,
            today,
            confidence_sort,
            sort_by,
            order,
            limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Case-insensitive substring match.
    Contains(Column, String),
    Equals(Column, i64),
    AtLeast(Column, f64),
    /// Event dated today, or yesterday when nothing in the store is dated today.
    DatedTodayOrYesterday(DayWindow),
}

impl Clause {
    /// `day` is the resolved date for [`Clause::DatedTodayOrYesterday`].
    fn matches(&self, row: &StoredStock, day: Option<NaiveDate>) -> bool {
        match self {
            Self::Contains(col, value) => col
                .text(row)
                .is_some_and(|t| t.to_lowercase().contains(&value.to_lowercase())),
            Self::Equals(Column::Id, value) => row.id == *value,
            Self::Equals(..) => false,
            Self::AtLeast(col, value) => col.number(row).is_some_and(|n| n >= *value),
            Self::DatedTodayOrYesterday(_) => day == Some(row.time.date_naive()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockQuery {
    pub clauses: Vec<Clause>,
    pub ordering: Vec<(Column, SortOrder)>,
    pub limit: i64,
}

impl StockQuery {
    pub fn plan(filter: &StockFilter, window: DayWindow) -> Self {
        let mut clauses = Vec::new();
        if let Some(v) = &filter.ticker {
            clauses.push(Clause::Contains(Column::Ticker, v.clone()));
        }
        if let Some(v) = &filter.company {
            clauses.push(Clause::Contains(Column::Company, v.clone()));
        }
        if let Some(v) = &filter.brokerage {
            clauses.push(Clause::Contains(Column::Brokerage, v.clone()));
        }
        if let Some(id) = filter.id {
            clauses.push(Clause::Equals(Column::Id, id));
        }
        if let Some(min) = filter.min_score {
            clauses.push(Clause::AtLeast(Column::Score, min));
        }
        if filter.today {
            clauses.push(Clause::DatedTodayOrYesterday(window));
        }

        let mut ordering = match (filter.confidence_sort, filter.sort_by) {
            (Some(dir), _) => vec![(Column::Confidence, dir)],
            (None, Some(field)) => vec![(field, filter.order)],
            (None, None) => vec![(Column::Confidence, SortOrder::Desc)],
        };
        if !ordering.iter().any(|(c, _)| *c == Column::Id) {
            ordering.push((Column::Id, SortOrder::Asc));
        }

        let limit = filter
            .limit
            .filter(|l| (1..=MAX_LIMIT).contains(l))
            .unwrap_or(DEFAULT_LIMIT);

        Self {
            clauses,
            ordering,
            limit,
        }
    }

    pub fn build(&self) -> QueryBuilder<'_, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(STOCK_COLUMNS);
        qb.push(
            ", (SELECT COUNT(*) FROM stocks) AS total_count, \
             (SELECT COUNT(*) FROM stocks WHERE ",
        );
        qb.push(NORMALIZED_RATING_SQL).push(" = ANY(");
        qb.push_bind(
            TOP_RATING_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
        );
        qb.push(
            ")) AS top_rated_count, \
             (SELECT COUNT(DISTINCT brokerage) FROM stocks) AS brokerage_count, \
             (SELECT MAX(updated_at) FROM stocks) AS last_updated \
             FROM stocks WHERE TRUE",
        );

        for clause in &self.clauses {
            match clause {
                Clause::Contains(col, value) => {
                    qb.push(" AND ")
                        .push(col.sql())
                        .push(" ILIKE ")
                        .push_bind(format!("%{}%", escape_like(value)));
                }
                Clause::Equals(col, value) => {
                    qb.push(" AND ").push(col.sql()).push(" = ").push_bind(*value);
                }
                Clause::AtLeast(col, value) => {
                    qb.push(" AND ").push(col.sql()).push(" >= ").push_bind(*value);
                }
                Clause::DatedTodayOrYesterday(window) => {
                    qb.push(
                        " AND (time AT TIME ZONE 'UTC')::date = CASE WHEN EXISTS \
                         (SELECT 1 FROM stocks t WHERE (t.time AT TIME ZONE 'UTC')::date = ",
                    )
                    .push_bind(window.today)
                    .push(") THEN ")
                    .push_bind(window.today)
                    .push(" ELSE ")
                    .push_bind(window.yesterday)
                    .push(" END");
                }
            }
        }

        qb.push(" ORDER BY ");
        for (i, (col, dir)) in self.ordering.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(col.sql()).push(" ").push(dir.sql());
        }

        qb.push(" LIMIT ").push_bind(self.limit);
        qb
    }

    /// Runs the plan over a full in-memory store, with statistics over all of `store`.
    pub fn evaluate(&self, store: &[StoredStock]) -> Vec<StockRow> {
        let stats = AggregateStats::collect(store);
        let day = self.clauses.iter().find_map(|c| match c {
            Clause::DatedTodayOrYesterday(window) => Some(window.resolve(store.iter().map(|r| r.time))),
            _ => None,
        });

        let mut matched: Vec<&StoredStock> = store
            .iter()
            .filter(|row| self.clauses.iter().all(|c| c.matches(row, day)))
            .collect();
        matched.sort_by(|a, b| {
            self.ordering
                .iter()
                .fold(Ordering::Equal, |acc, (col, dir)| {
                    acc.then_with(|| match dir {
                        SortOrder::Asc => col.compare(a, b),
                        SortOrder::Desc => col.compare(b, a),
                    })
                })
        });

        matched
            .into_iter()
            .take(self.limit.max(0) as usize)
            .map(|stock| StockRow {
                stock: stock.clone(),
                stats: stats.clone(),
            })
            .collect()
    }
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Final pass: highest confidence first, keeping the database order among equals.
pub fn stabilize(rows: &mut [StockRow]) {
    rows.sort_by(|a, b| b.stock.confidence.total_cmp(&a.stock.confidence));
}

pub async fn list_stocks(
    pool: &PgPool,
    filter: &StockFilter,
    now: DateTime<Utc>,
) -> Result<Vec<StockRow>, QueryError> {
    let query = StockQuery::plan(filter, DayWindow::from_now(now));
    let mut qb = query.build();
    let mut rows: Vec<StockRow> = qb.build_query_as::<StockRow>().fetch_all(pool).await?;
    stabilize(&mut rows);

    tracing::debug!(
        clauses = query.clauses.len(),
        limit = query.limit,
        returned = rows.len(),
        "stock query"
    );
    Ok(rows)
}
