use std::time::Duration;
use tokio::time::sleep;

/// Capped exponential backoff for long-running RPC pollers.
///
/// Unlike a connect-once client, the pollers in this service must never give
/// up, so there is no retry limit: the delay saturates at `max_delay_ms`.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            current_attempt: 0,
        }
    }

    /// Delay the next `sleep()` will wait
    pub fn next_delay(&self) -> Duration {
        let factor = 1u64.checked_shl(self.current_attempt).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(std::cmp::min(delay, self.max_delay_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub async fn sleep(&mut self) {
        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} in {}ms",
            self.current_attempt + 1,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt = self.current_attempt.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let mut backoff = ExponentialBackoff::new(100, 1_000);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));

        backoff.current_attempt = 1;
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));

        backoff.current_attempt = 3;
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));

        backoff.current_attempt = 4;
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));

        // Shift overflow saturates instead of panicking
        backoff.current_attempt = 200;
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_sleep_advances_and_reset() {
        let mut backoff = ExponentialBackoff::new(1, 2);
        backoff.sleep().await;
        backoff.sleep().await;
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }
}
