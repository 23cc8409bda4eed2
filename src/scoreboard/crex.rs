use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

use super::provider::TitleSource;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Title source for CREX scoreboard pages.
///
/// CREX renders the live score into the document title, so only the
/// `<title>` element is read.
pub struct CrexScraper {
    http: Client,
}

impl CrexScraper {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        let http = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(CrexScraper { http })
    }
}

#[async_trait]
impl TitleSource for CrexScraper {
    fn name(&self) -> &str {
        "CREX"
    }

    async fn fetch_title(&self, url: &str) -> Result<String> {
        debug!("Fetching scoreboard page {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Scoreboard request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Scoreboard error: {}", resp.status());
        }

        if let Some(content_type) = resp.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !is_textual(content_type) {
                anyhow::bail!("Scoreboard returned non-text content: {}", content_type);
            }
        }

        let body = resp
            .text()
            .await
            .context("Failed to read scoreboard response")?;

        Ok(extract_title(&body).unwrap_or_default())
    }
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("xml")
}

/// Trimmed text of the document's first `<title>` element.
pub fn extract_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title = document.select(&selector).next()?;
    Some(title.text().collect::<String>().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title() {
        let html = r#"<!DOCTYPE html><html><head>
            <title>
              IND 175-3 (25.5) vs AUS 225-9 ((50.0)) | Live Cricket Score
            </title></head><body><h1>ignored</h1></body></html>"#;
        assert_eq!(
            extract_title(html).as_deref(),
            Some("IND 175-3 (25.5) vs AUS 225-9 ((50.0)) | Live Cricket Score")
        );
    }

    #[test]
    fn test_extract_title_decodes_entities() {
        let html = "<html><head><title>A &amp; B 1-0 (0.1) vs C</title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("A & B 1-0 (0.1) vs C"));
    }

    #[test]
    fn test_extract_title_missing() {
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn test_is_textual() {
        assert!(is_textual("text/html; charset=utf-8"));
        assert!(is_textual("application/xhtml+xml"));
        assert!(!is_textual("image/png"));
        assert!(!is_textual("application/octet-stream"));
    }
}
