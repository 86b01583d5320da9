//! Session clock for age and idle tracking

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Session clock
///
/// Holds the instant the session went active and the offset of the most
/// recent activity (a send or a frame dequeue) relative to it. Cloning shares
/// the same clock, so the ingest path, the consumer API and the supervisor
/// all observe one timeline.
///
/// Built on `tokio::time::Instant` so a paused test runtime drives it.
#[derive(Clone)]
pub struct SessionClock {
    base: Arc<std::sync::Mutex<Instant>>,

    /// Microseconds from `base` to the last activity
    last_activity: Arc<AtomicU64>,
}

impl SessionClock {
    /// Create a new clock starting now
    pub fn new() -> Self {
        Self {
            base: Arc::new(std::sync::Mutex::new(Instant::now())),
            last_activity: Arc::new(AtomicU64::new(0)),
        }
    }

    fn base(&self) -> Instant {
        match self.base.lock() {
            Ok(base) => *base,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Restart the clock; called when the session becomes active
    pub fn restart(&self) {
        let now = Instant::now();
        match self.base.lock() {
            Ok(mut base) => *base = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
        self.last_activity.store(0, Ordering::Relaxed);
    }

    /// Record activity at the current instant
    pub fn touch(&self) {
        let offset = self.base().elapsed().as_micros() as u64;
        self.last_activity.fetch_max(offset, Ordering::Relaxed);
    }

    /// Time since the clock (re)started
    pub fn age(&self) -> Duration {
        self.base().elapsed()
    }

    /// Time since the last recorded activity
    pub fn idle(&self) -> Duration {
        let last = Duration::from_micros(self.last_activity.load(Ordering::Relaxed));
        self.age().saturating_sub(last)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("age", &self.age())
            .field("idle", &self.idle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_age_and_idle() {
        let clock = SessionClock::new();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(clock.age(), Duration::from_secs(3));
        assert_eq!(clock.idle(), Duration::from_secs(3));

        clock.touch();
        assert_eq!(clock.idle(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(clock.age(), Duration::from_secs(5));
        assert_eq!(clock.idle(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_timeline() {
        let clock = SessionClock::new();
        let other = clock.clone();

        tokio::time::sleep(Duration::from_secs(4)).await;
        other.touch();
        assert_eq!(clock.idle(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_age() {
        let clock = SessionClock::new();
        tokio::time::sleep(Duration::from_secs(10)).await;

        clock.restart();
        assert_eq!(clock.age(), Duration::ZERO);
        assert_eq!(clock.idle(), Duration::ZERO);
    }
}
