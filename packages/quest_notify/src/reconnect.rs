//! Reconnection scheduling: a fixed-interval, bounded retry policy and the
//! cancellable timer that carries one pending retry.
//!
//! Fixed interval, no backoff. Once the cap is reached nothing is scheduled
//! until a fresh `connect` opens a socket and resets the attempt counter.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Default retry cap.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay between an abnormal close and the next attempt.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            interval: RECONNECT_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts were already
    /// made since the last successful open. `None` once the cap is reached.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        (attempts_made < self.max_attempts).then_some(self.interval)
    }
}

/// One armed retry. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    id: u64,
    _guard: DropGuard,
}

impl RetryTimer {
    /// Run `on_fire` after `delay` unless the timer is dropped first.
    ///
    /// `on_fire` still has to confirm, under the channel lock, that this
    /// timer is the one currently armed: cancellation and firing can race
    /// across threads, the lock decides who wins.
    pub(crate) fn arm<F>(runtime: &Handle, id: u64, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = child.cancelled() => {}
                () = tokio::time::sleep(delay) => on_fire(),
            }
        });
        Self {
            id,
            _guard: cancel.drop_guard(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn default_policy_is_five_attempts_three_seconds_apart() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_millis(3000));
    }

    #[test]
    fn next_delay_stops_at_cap() {
        let policy = ReconnectPolicy::default();
        for made in 0..5 {
            assert_eq!(policy.next_delay(made), Some(Duration::from_millis(3000)));
        }
        assert_eq!(policy.next_delay(5), None);
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn zero_cap_never_retries() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            interval: Duration::from_millis(10),
        };
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn policy_serializes_interval_as_millis() {
        let json = serde_json::to_string(&ReconnectPolicy::default()).unwrap();
        assert_eq!(json, r#"{"max_attempts":5,"interval":3000}"#);
        let back: ReconnectPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReconnectPolicy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _timer = RetryTimer::arm(&Handle::current(), 1, Duration::from_secs(3), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_timer_cancels_it() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = RetryTimer::arm(&Handle::current(), 7, Duration::from_secs(3), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(timer.id(), 7);
        drop(timer);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
