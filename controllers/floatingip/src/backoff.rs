//! # Bounded Poll
//!
//! Retries an async operation at a fixed interval until it succeeds or a
//! time budget runs out. Used for writes that commonly race with other
//! writers of the same object (pod annotations, TApp updates).

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll gave up before the operation succeeded.
#[derive(Debug)]
pub struct PollTimeout<E> {
    /// Number of attempts made
    pub attempts: u32,
    /// Error of the last attempt
    pub last_error: E,
}

/// Fixed-interval poll with an overall time cap.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    interval: Duration,
    timeout: Duration,
}

impl PollBackoff {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Runs `op` until it returns `Ok`, sleeping `interval` between attempts.
    ///
    /// At least one attempt is always made. No attempt starts after the
    /// timeout has elapsed.
    pub async fn poll<T, E, F, Fut>(&self, mut op: F) -> Result<T, PollTimeout<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(last_error) => {
                    if Instant::now() + self.interval > deadline {
                        return Err(PollTimeout { attempts, last_error });
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_succeeds_after_retries() {
        let backoff = PollBackoff::new(Duration::from_millis(1), Duration::from_secs(5));
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, PollTimeout<&str>> = backoff
            .poll(|| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("conflict") } else { Ok(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let backoff = PollBackoff::new(Duration::from_millis(5), Duration::from_millis(20));
        let result: Result<(), PollTimeout<&str>> = backoff.poll(|| async { Err("conflict") }).await;
        let timeout = result.unwrap_err();
        assert!(timeout.attempts >= 1);
        assert!(timeout.attempts <= 5);
        assert_eq!(timeout.last_error, "conflict");
    }

    #[tokio::test]
    async fn test_poll_zero_timeout_still_tries_once() {
        let backoff = PollBackoff::new(Duration::from_millis(5), Duration::ZERO);
        let result: Result<(), PollTimeout<&str>> = backoff.poll(|| async { Err("down") }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
