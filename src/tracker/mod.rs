pub mod fanout;
pub mod freshness;

pub use fanout::{Delivery, SubscriberFanout, Subscription};
pub use freshness::FreshnessScheduler;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::MatchSnapshot;
use crate::scoreboard::{TitleParser, TitleSource};

/// Lower bound between background checks so a stuck clock never spins.
const MIN_AUTO_UPDATE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("no match URL configured")]
    NotConfigured,
    #[error("scoreboard fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("scoreboard fetch failed: {0:#}")]
    Fetch(#[from] anyhow::Error),
}

/// Result of a freshness-gated refresh.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(Arc<MatchSnapshot>),
    /// The current snapshot is still within the update interval
    Fresh,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub update_interval: Duration,
    pub fetch_timeout: Duration,
    pub format_overs: f64,
    pub subscriber_buffer: usize,
    pub auto_update: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            update_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            format_overs: 20.0,
            subscriber_buffer: 16,
            auto_update: true,
        }
    }
}

/// Read-only view of the tracker for status endpoints.
#[derive(Debug, Clone)]
pub struct TrackerStatus {
    pub match_url: Option<String>,
    pub auto_update: bool,
    pub update_interval: Duration,
    pub has_data: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub should_update: bool,
    pub active_connections: usize,
}

struct TrackedMatch {
    url: Option<String>,
    snapshot: Option<Arc<MatchSnapshot>>,
    freshness: FreshnessScheduler,
}

/// Application context for the single tracked match.
///
/// Holds the tracked URL, the current snapshot and its freshness, the
/// auto-update toggle and the subscriber fanout. Fetches are serialized so
/// concurrent triggers collapse into one network call.
pub struct MatchTracker {
    source: Arc<dyn TitleSource>,
    parser: TitleParser,
    fetch_timeout: Duration,
    state: RwLock<TrackedMatch>,
    auto_update: AtomicBool,
    fanout: SubscriberFanout,
    refresh_lock: Mutex<()>,
}

impl MatchTracker {
    pub fn new(source: Arc<dyn TitleSource>, settings: TrackerSettings) -> Self {
        MatchTracker {
            source,
            parser: TitleParser::new(settings.format_overs),
            fetch_timeout: settings.fetch_timeout,
            state: RwLock::new(TrackedMatch {
                url: None,
                snapshot: None,
                freshness: FreshnessScheduler::new(settings.update_interval),
            }),
            auto_update: AtomicBool::new(settings.auto_update),
            fanout: SubscriberFanout::new(settings.subscriber_buffer),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn parser(&self) -> &TitleParser {
        &self.parser
    }

    pub async fn match_url(&self) -> Option<String> {
        self.state.read().await.url.clone()
    }

    pub async fn current_snapshot(&self) -> Option<Arc<MatchSnapshot>> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn is_update_due(&self) -> bool {
        self.state.read().await.freshness.is_due()
    }

    pub async fn update_interval(&self) -> Duration {
        self.state.read().await.freshness.interval()
    }

    pub fn auto_update_enabled(&self) -> bool {
        self.auto_update.load(Ordering::Relaxed)
    }

    /// Flip the auto-update flag and return the new value.
    pub fn toggle_auto_update(&self) -> bool {
        let enabled = !self.auto_update.fetch_xor(true, Ordering::Relaxed);
        info!("Auto-update {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }

    /// Open a subscriber channel primed with the current snapshot, if any.
    pub async fn subscribe(&self) -> Subscription {
        let mut subscription = self.fanout.register();
        if let Some(snapshot) = self.current_snapshot().await {
            subscription.prime(snapshot);
        }
        subscription
    }

    pub async fn status(&self) -> TrackerStatus {
        let state = self.state.read().await;
        TrackerStatus {
            match_url: state.url.clone(),
            auto_update: self.auto_update_enabled(),
            update_interval: state.freshness.interval(),
            has_data: state.snapshot.is_some(),
            last_update: state.freshness.last_update(),
            should_update: state.freshness.is_due(),
            active_connections: self.fanout.len(),
        }
    }

    /// Track a new match URL and fetch it immediately.
    ///
    /// The URL stays tracked even if the first fetch fails; the next
    /// refresh will retry it.
    pub async fn set_match_url(&self, url: &str) -> Result<Arc<MatchSnapshot>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let mut state = self.state.write().await;
            state.url = Some(url.to_string());
            state.freshness.reset();
        }
        info!("Tracking match URL {}", url);
        self.fetch_and_publish(url).await
    }

    /// Fetch the tracked URL now, regardless of freshness.
    pub async fn refresh(&self) -> Result<Arc<MatchSnapshot>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        // read under the lock so a queued set_match_url is not overwritten
        let url = self.match_url().await.ok_or(RefreshError::NotConfigured)?;
        self.fetch_and_publish(&url).await
    }

    /// Fetch `url` now and publish the result without changing the tracked URL.
    pub async fn scrape(&self, url: &str) -> Result<Arc<MatchSnapshot>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_publish(url).await
    }

    /// Fetch the tracked URL if the current snapshot is stale.
    pub async fn refresh_if_due(&self) -> Result<RefreshOutcome, RefreshError> {
        if self.match_url().await.is_none() {
            return Err(RefreshError::NotConfigured);
        }
        if !self.is_update_due().await {
            return Ok(RefreshOutcome::Fresh);
        }

        let _guard = self.refresh_lock.lock().await;
        // another caller may have refreshed or retargeted while we waited
        if !self.is_update_due().await {
            debug!("Refresh already done by a concurrent caller");
            return Ok(RefreshOutcome::Fresh);
        }
        let url = self.match_url().await.ok_or(RefreshError::NotConfigured)?;
        self.fetch_and_publish(&url)
            .await
            .map(RefreshOutcome::Refreshed)
    }

    /// One fetch-parse-publish cycle. Callers hold `refresh_lock`.
    async fn fetch_and_publish(&self, url: &str) -> Result<Arc<MatchSnapshot>, RefreshError> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch_title(url)).await;
        let title = match fetched {
            Ok(Ok(title)) => title,
            Ok(Err(e)) => {
                warn!("[{}] Failed to fetch {}: {:#}", self.source.name(), url, e);
                return Err(RefreshError::Fetch(e));
            }
            Err(_) => {
                warn!(
                    "[{}] Fetch of {} timed out after {:?}",
                    self.source.name(),
                    url,
                    self.fetch_timeout
                );
                return Err(RefreshError::Timeout(self.fetch_timeout));
            }
        };

        let snapshot = Arc::new(self.parser.parse(&title));
        {
            let mut state = self.state.write().await;
            state.snapshot = Some(Arc::clone(&snapshot));
            state.freshness.mark_updated(snapshot.captured_at);
        }

        let delivered = self.fanout.broadcast(Arc::clone(&snapshot));
        log_match_update(&snapshot, delivered);
        Ok(snapshot)
    }
}

fn log_match_update(snap: &MatchSnapshot, delivered: usize) {
    info!(
        "Match update: {} | {} | {} | {} ({} subscriber(s) notified)",
        snap.live_score_summary,
        snap.team2_status.label(),
        snap.run_rate.label(),
        snap.status_line,
        delivered
    );
    for batsman in snap.striker_pair.iter().flatten() {
        info!(
            "  {} {}({}) SR {}",
            batsman.name,
            batsman.runs,
            batsman.balls_faced,
            batsman.strike_rate_label()
        );
    }
}

/// Spawn the background loop that keeps the tracked match fresh.
///
/// Checks roughly once per update interval, and only acts while auto-update
/// is enabled and a URL is tracked. A failed fetch waits a full interval
/// before the next attempt.
pub fn spawn_auto_update(tracker: Arc<MatchTracker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = tracker.update_interval().await;
        info!("Auto-update loop started (interval={:?})", interval);

        let mut wait = interval;
        loop {
            tokio::time::sleep(wait).await;
            wait = interval;

            if !tracker.auto_update_enabled() {
                debug!("[auto-update] disabled, skipping");
                continue;
            }

            match tracker.refresh_if_due().await {
                Ok(RefreshOutcome::Refreshed(_)) => debug!("[auto-update] refreshed"),
                Ok(RefreshOutcome::Fresh) => debug!("[auto-update] data still fresh"),
                Err(RefreshError::NotConfigured) => continue,
                Err(e) => {
                    error!("[auto-update] {}", e);
                    continue;
                }
            }

            let state = tracker.state.read().await;
            wait = state
                .freshness
                .time_until_due(Utc::now())
                .clamp(MIN_AUTO_UPDATE_WAIT, interval.max(MIN_AUTO_UPDATE_WAIT));
        }
    })
}
