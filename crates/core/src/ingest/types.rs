use crate::domain::stock::RatingEvent;
use serde::{Deserialize, Serialize};

/// One page of the upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<RatingEvent>,
    #[serde(default)]
    pub next_page: Option<String>,
}

impl FeedPage {
    /// The cursor for the following page; blank or absent means end of feed.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_page
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
