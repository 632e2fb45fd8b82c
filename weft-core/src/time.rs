//! Time provider seam.
//!
//! The transport never sleeps through the runtime directly: back-off
//! ladders on the write path, the acceptor's periodic tick and the
//! connector's retry pause all request their delays from a
//! [`TimeProvider`]. Production code runs on [`TokioTimeProvider`]; tests
//! substitute providers that record or collapse the requested delays, so
//! idler behavior is asserted on the durations asked for instead of waited
//! out in real time.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// A future raced against a deadline and lost.
    #[error("operation timed out")]
    Elapsed,
}

/// Source of delays and elapsed time.
///
/// `Clone` so every idler carries its own handle to the shared clock.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Wait out `duration`.
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since this provider was created.
    ///
    /// A monotonic offset, not wall-clock time: only differences between
    /// two readings from the same provider are meaningful.
    fn now(&self) -> Duration;

    /// Race `future` against a deadline.
    ///
    /// # Errors
    ///
    /// [`TimeError::Elapsed`] when the deadline wins.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>;
}

/// Tokio-backed clock.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    /// Creation instant; `now` reports offsets from here.
    origin: Instant,
}

impl TokioTimeProvider {
    /// Provider anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_now_advances_across_sleep() {
        let time = TokioTimeProvider::new();
        let before = time.now();
        time.sleep(Duration::from_millis(5)).await;
        assert!(time.now() - before >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_timeout_loses_the_race() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
    }

    #[tokio::test]
    async fn test_timeout_wins_the_race() {
        let time = TokioTimeProvider::new();
        let result = time.timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }
}
