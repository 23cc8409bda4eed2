use chrono::{DateTime, Utc};
use std::time::Duration;

/// Decides whether the tracked match is due for a re-fetch.
#[derive(Debug, Clone)]
pub struct FreshnessScheduler {
    interval: Duration,
    last_update: Option<DateTime<Utc>>,
}

impl FreshnessScheduler {
    pub fn new(interval: Duration) -> Self {
        FreshnessScheduler {
            interval,
            last_update: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_due(&self) -> bool {
        self.is_due_at(Utc::now())
    }

    /// Due when nothing has been fetched yet, or the full elapsed time since
    /// the last success has reached the interval.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_update {
            None => true,
            Some(last) => elapsed(last, now) >= self.interval,
        }
    }

    /// Time left until the next refresh is due; zero when already due.
    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        match self.last_update {
            None => Duration::ZERO,
            Some(last) => self.interval.saturating_sub(elapsed(last, now)),
        }
    }

    pub fn mark_updated(&mut self, at: DateTime<Utc>) {
        self.last_update = Some(at);
    }

    /// Forget the last update, making the next check due.
    pub fn reset(&mut self) {
        self.last_update = None;
    }
}

/// Wall-clock time between two instants; a clock that stepped backwards
/// counts as no time elapsed.
fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
