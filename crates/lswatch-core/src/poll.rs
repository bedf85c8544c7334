//! Bounded polling for hooks registered by other extensions.

use std::time::Duration;
use tokio::time::sleep;

/// How often, and how many times, to check a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for PollPolicy {
    /// 20 checks, 500ms apart.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            attempts: 20,
        }
    }
}

/// Check `ready` up to `policy.attempts` times, sleeping after each miss.
///
/// Returns whether the condition became true.
pub async fn poll_until<F>(policy: PollPolicy, mut ready: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..policy.attempts {
        if ready() {
            return true;
        }
        sleep(policy.interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_after_attempts() {
        let started = Instant::now();
        let mut checks = 0;
        let found = poll_until(PollPolicy::default(), || {
            checks += 1;
            false
        })
        .await;

        assert!(!found);
        assert_eq!(checks, 20);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_once_ready() {
        let mut checks = 0;
        let found = poll_until(PollPolicy::default(), || {
            checks += 1;
            checks == 3
        })
        .await;

        assert!(found);
        assert_eq!(checks, 3);
    }
}
