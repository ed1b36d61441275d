use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff with a retry budget, used around durable-store I/O.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Sleep for the next backoff step, or fail once the budget is spent.
    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay_ms = std::cmp::min(
            self.initial_delay_ms.saturating_mul(1 << self.current_attempt),
            self.max_delay_ms,
        );

        log::warn!(
            "retry {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay_ms
        );

        sleep(Duration::from_millis(delay_ms)).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backoff_exhausts_budget() {
        let mut backoff = ExponentialBackoff::new(1, 4, 3);
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());

        backoff.reset();
        assert!(backoff.sleep().await.is_ok());
    }

    #[tokio::test]
    async fn test_delay_is_capped() {
        // 1ms, 2ms, 4ms, then capped at 5ms; just verify it completes quickly
        let mut backoff = ExponentialBackoff::new(1, 5, 5);
        let start = std::time::Instant::now();
        while backoff.sleep().await.is_ok() {}
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
