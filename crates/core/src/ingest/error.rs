/// Why a single feed request failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

/// A failed `fetch_all`, pinned to the page that broke it.
#[derive(Debug, thiserror::Error)]
#[error("feed page {page} (cursor={}) failed: {kind}", .cursor.as_deref().unwrap_or("<none>"))]
pub struct FeedError {
    /// 1-based page number.
    pub page: usize,
    pub cursor: Option<String>,
    #[source]
    pub kind: FetchFailure,
}

impl FeedError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, FetchFailure::Cancelled)
    }
}
