//! Session length and idle time enforcement

use log::{debug, info};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::clock::SessionClock;
use super::state::StopReason;

/// Periodically compares the session clock against its limits
pub struct TimeoutSupervisor {
    clock: SessionClock,
    max_session_length: Duration,
    max_idle_time: Duration,
    tick: Duration,
    cancel: CancellationToken,
}

impl TimeoutSupervisor {
    pub fn new(
        clock: SessionClock,
        max_session_length: Duration,
        max_idle_time: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clock,
            max_session_length,
            max_idle_time,
            tick: Duration::from_secs(1),
            cancel,
        }
    }

    /// Configure how often the limits are checked
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Which limit, if any, the clock has crossed
    pub fn check(&self) -> Option<StopReason> {
        if self.clock.age() >= self.max_session_length {
            Some(StopReason::SessionLengthExceeded)
        } else if self.clock.idle() >= self.max_idle_time {
            Some(StopReason::IdleTimeExceeded)
        } else {
            None
        }
    }

    /// Run until a limit is crossed or the session is cancelled.
    ///
    /// Returns the crossed limit; `None` means cancelled.
    pub async fn run(self) -> Option<StopReason> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            "Supervisor: limits {:?} total, {:?} idle, checked every {:?}",
            self.max_session_length, self.max_idle_time, self.tick
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Supervisor: cancelled");
                    return None;
                }
                _ = interval.tick() => {}
            }

            if let Some(reason) = self.check() {
                info!(
                    "Supervisor: {} (age {:?}, idle {:?})",
                    reason,
                    self.clock.age(),
                    self.clock.idle()
                );
                return Some(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn supervisor(total: u64, idle: u64) -> (TimeoutSupervisor, SessionClock, CancellationToken) {
        let clock = SessionClock::new();
        let cancel = CancellationToken::new();
        let supervisor = TimeoutSupervisor::new(
            clock.clone(),
            Duration::from_secs(total),
            Duration::from_secs(idle),
            cancel.clone(),
        );
        (supervisor, clock, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limit_fires_within_a_tick() {
        let (supervisor, _clock, _cancel) = supervisor(20, 10);
        let start = Instant::now();

        assert_eq!(supervisor.run().await, Some(StopReason::IdleTimeExceeded));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_idle_but_not_session_length() {
        let (supervisor, clock, _cancel) = supervisor(20, 10);
        let start = Instant::now();

        let toucher = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3)).await;
                clock.touch();
            }
        });

        assert_eq!(
            supervisor.run().await,
            Some(StopReason::SessionLengthExceeded)
        );
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() <= Duration::from_secs(21));
        toucher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_none() {
        let (supervisor, _clock, cancel) = supervisor(600, 30);
        let task = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_prefers_session_length() {
        let (supervisor, _clock, _cancel) = supervisor(0, 0);
        assert_eq!(supervisor.check(), Some(StopReason::SessionLengthExceeded));
    }
}
