use anyhow::Result;
use async_trait::async_trait;

/// Trait that every scoreboard page source must implement.
#[async_trait]
pub trait TitleSource: Send + Sync {
    /// Fetch the page at `url` and return its `<title>` text.
    async fn fetch_title(&self, url: &str) -> Result<String>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
