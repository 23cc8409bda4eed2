use clap::{ArgAction, Parser};
use std::time::Duration;

use crate::scoreboard::crex::DEFAULT_USER_AGENT;
use crate::tracker::TrackerSettings;

/// Cricket scoreboard relay: scrapes a live match page and republishes it
#[derive(Parser, Debug, Clone)]
#[command(name = "cricket-live-relay", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    pub listen_addr: String,

    /// Scoreboard page to start tracking (can also be set via the API)
    #[arg(long, env = "MATCH_URL")]
    pub match_url: Option<String>,

    /// Seconds between scoreboard refreshes
    #[arg(long, env = "UPDATE_INTERVAL_SECS", default_value = "30")]
    pub update_interval_secs: u64,

    /// Refresh in the background (toggle at runtime via the API)
    #[arg(long, env = "AUTO_UPDATE", default_value = "true", action = ArgAction::Set)]
    pub auto_update: bool,

    /// Timeout for one scoreboard fetch, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "10")]
    pub fetch_timeout_secs: u64,

    /// Innings length in overs, used for required run rate (20 for T20, 50 for ODI)
    #[arg(long, env = "FORMAT_OVERS", default_value = "20.0")]
    pub format_overs: f64,

    /// Seconds of silence before an event stream gets a keepalive
    #[arg(long, env = "KEEPALIVE_SECS", default_value = "30")]
    pub keepalive_secs: u64,

    /// Queued snapshots per stream subscriber before it is dropped
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value = "16")]
    pub subscriber_buffer: usize,

    /// User-Agent sent to the scoreboard site
    #[arg(long, env = "USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.update_interval_secs == 0 {
            anyhow::bail!("update_interval_secs must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be at least 1");
        }
        if self.keepalive_secs == 0 {
            anyhow::bail!("keepalive_secs must be at least 1");
        }
        if !(self.format_overs.is_finite() && self.format_overs > 0.0) {
            anyhow::bail!("format_overs must be a positive number of overs");
        }
        if self.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be at least 1");
        }
        if let Some(url) = &self.match_url {
            validate_match_url(url)?;
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            update_interval: Duration::from_secs(self.update_interval_secs),
            fetch_timeout: self.fetch_timeout(),
            format_overs: self.format_overs,
            subscriber_buffer: self.subscriber_buffer,
            auto_update: self.auto_update,
        }
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_match_url(raw: &str) -> anyhow::Result<url::Url> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid match URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => anyhow::bail!("unsupported URL scheme '{}' (expected http or https)", other),
    }
}
