use crate::config::Settings;
use crate::domain::stock::RatingEvent;
use crate::ingest::error::{FeedError, FetchFailure};
use crate::ingest::types::FeedPage;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CURSOR_PARAM: &str = "cursor";
const DEFAULT_MAX_ITEMS: usize = 1000;
const DEFAULT_PAGE_DELAY_MS: u64 = 100;
const ERROR_BODY_LIMIT: usize = 512;

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetches one page. `None` (or an empty cursor) asks for the first page.
    async fn fetch(&self, cursor: Option<&str>) -> Result<FeedPage, FetchFailure>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    cursor_param: String,
}

impl HttpFeedClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings.require_feed_url()?.to_string();
        let api_key = settings.require_feed_api_key()?.to_string();

        let timeout_secs = std::env::var("FEED_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let cursor_param = std::env::var("FEED_CURSOR_PARAM")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURSOR_PARAM.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build feed http client")?;

        Ok(Self::new(http, url, api_key, cursor_param))
    }

    pub fn new(http: reqwest::Client, url: String, api_key: String, cursor_param: String) -> Self {
        Self {
            http,
            url,
            api_key,
            cursor_param,
        }
    }

    fn request(&self, cursor: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self.http.get(&self.url).bearer_auth(&self.api_key);
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            req = req.query(&[(self.cursor_param.as_str(), cursor)]);
        }
        req
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedClient {
    fn source_name(&self) -> &'static str {
        "http_feed"
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FeedPage, FetchFailure> {
        let res = self
            .request(cursor)
            .send()
            .await
            .map_err(FetchFailure::Transport)?;

        let status = res.status();
        let text = res.text().await.map_err(FetchFailure::Transport)?;

        if !status.is_success() {
            let body: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<FeedPage>(&text).map_err(FetchFailure::Parse)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound on events gathered in one `fetch_all`; reaching it is not end-of-feed.
    pub max_items: usize,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
        }
    }
}

impl FetchOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("FEED_MAX_ITEMS") {
            if let Ok(n) = s.parse::<usize>() {
                if n >= 1 {
                    out.max_items = n;
                }
            }
        }

        if let Ok(s) = std::env::var("FEED_PAGE_DELAY_MS") {
            if let Ok(ms) = s.parse::<u64>() {
                out.page_delay = Duration::from_millis(ms);
            }
        }

        out
    }
}

/// Walks the feed from the first page until it runs out of cursors, repeats one, or `max_items`
/// is reached.
///
/// Any page failure drops everything gathered so far. Cancellation is honoured before each page
/// and during the inter-page delay.
pub async fn fetch_all(
    source: &dyn FeedSource,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<Vec<RatingEvent>, FeedError> {
    let mut events: Vec<RatingEvent> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page: usize = 0;
    let mut visited: HashSet<String> = HashSet::new();

    loop {
        page += 1;
        if cancel.is_cancelled() {
            return Err(FeedError {
                page,
                cursor,
                kind: FetchFailure::Cancelled,
            });
        }

        let fetched = match source.fetch(cursor.as_deref()).await {
            Ok(fetched) => fetched,
            Err(kind) => return Err(FeedError { page, cursor, kind }),
        };

        let received = fetched.items.len();
        let next = fetched.next_cursor().map(str::to_string);
        let remaining = opts.max_items.saturating_sub(events.len());
        events.extend(fetched.items.into_iter().take(remaining));

        tracing::debug!(
            page,
            received,
            total = events.len(),
            has_next = next.is_some(),
            "feed page fetched"
        );

        let Some(next) = next else {
            break;
        };

        if !visited.insert(next.clone()) {
            tracing::warn!(
                page,
                cursor = %next,
                total = events.len(),
                "feed repeated a cursor; stopping pagination"
            );
            break;
        }

        if events.len() >= opts.max_items {
            tracing::warn!(
                page,
                max_items = opts.max_items,
                "feed item cap reached; remaining pages left for a later sync"
            );
            break;
        }

        cursor = Some(next);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(opts.page_delay) => {}
        }
    }

    Ok(events)
}
