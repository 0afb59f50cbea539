pub mod domain;
pub mod ingest;
pub mod scoring;
pub mod shutdown;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub feed_url: Option<String>,
        pub feed_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                feed_url: std::env::var("FEED_URL").ok(),
                feed_api_key: std::env::var("FEED_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_feed_url(&self) -> anyhow::Result<&str> {
            self.feed_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("FEED_URL is required")
        }

        pub fn require_feed_api_key(&self) -> anyhow::Result<&str> {
            self.feed_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("FEED_API_KEY is required")
        }
    }
}
