//! Idle strategies for the polling loops.
//!
//! The fabric never blocks: publications report back-pressure, images hand
//! out nothing when no fragment arrived, and registrations resolve at their
//! own pace. Every wait therefore has to be spelled out, and it is spelled
//! out as an [`Idler`]: a policy object producing one lazy "wait a bit"
//! step per retry. Readers (patient) and writers (urgent) pick different
//! strategies, and tests substitute deterministic ones.
//!
//! [`Idler::reset`] restarts a strategy's budget; the read path calls it
//! whenever a poll makes fragment progress so the back-off ladder collapses
//! back to a tight retry.

use async_trait::async_trait;
use std::rc::Rc;
use std::time::Duration;

use weft_core::TimeProvider;

use crate::config::BackoffConfig;
use crate::error::{TransportError, TransportResult};

/// Policy object producing one lazy wait step per call.
///
/// `idle` either resolves quickly or fails with
/// [`TransportError::Overloaded`] once a bounded strategy runs out of
/// budget.
#[async_trait(?Send)]
pub trait Idler {
    /// Wait once; completion means the caller may retry.
    async fn idle(&mut self) -> TransportResult<()>;

    /// Restart the strategy's budget after observable progress.
    fn reset(&mut self);
}

/// Boxed idler, the form the factories hand out.
pub type BoxIdler = Box<dyn Idler>;

/// Factory producing a fresh idler per retry sequence.
pub type IdlerFactory = Rc<dyn Fn() -> BoxIdler>;

/// Exponential back-off: spin first, then sleep with a doubling delay.
///
/// Used on the write hot path, where back-pressure stalls are expected to
/// clear within microseconds. Never fails.
pub struct Backoff<T: TimeProvider> {
    time: T,
    config: BackoffConfig,
    spins_left: u16,
    doublings_left: u16,
    delay: Duration,
}

impl<T: TimeProvider> Backoff<T> {
    /// Back-off with the default ladder (3 spins, 16 doublings from 1 ns).
    pub fn new(time: T) -> Self {
        Self::with_config(time, BackoffConfig::default())
    }

    /// Back-off with an explicit ladder.
    pub fn with_config(time: T, config: BackoffConfig) -> Self {
        let mut idler = Self {
            time,
            spins_left: 0,
            doublings_left: 0,
            delay: config.initial_delay,
            config,
        };
        idler.reset();
        idler
    }
}

#[async_trait(?Send)]
impl<T: TimeProvider> Idler for Backoff<T> {
    async fn idle(&mut self) -> TransportResult<()> {
        if self.spins_left > 0 {
            self.spins_left -= 1;
            tokio::task::yield_now().await;
            return Ok(());
        }
        let delay = self.delay;
        if self.doublings_left > 0 {
            self.doublings_left -= 1;
            self.delay *= 2;
        }
        self.time.sleep(delay).await;
        Ok(())
    }

    fn reset(&mut self) {
        self.spins_left = self.config.spins;
        self.doublings_left = self.config.doublings;
        self.delay = self.config.initial_delay;
    }
}

/// Cooperative yield bounded by a call budget.
///
/// Starve-guards retry loops that must not sleep: once the budget is
/// exhausted the step fails with [`TransportError::Overloaded`].
pub struct Yield {
    budget: u64,
    remaining: u64,
}

impl Yield {
    /// Unbounded yield.
    pub fn new() -> Self {
        Self::bounded(u64::MAX)
    }

    /// Yield at most `budget` times before failing.
    pub fn bounded(budget: u64) -> Self {
        Self {
            budget,
            remaining: budget,
        }
    }
}

impl Default for Yield {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Idler for Yield {
    async fn idle(&mut self) -> TransportResult<()> {
        if self.remaining == 0 {
            return Err(TransportError::Overloaded);
        }
        self.remaining -= 1;
        tokio::task::yield_now().await;
        Ok(())
    }

    fn reset(&mut self) {
        self.remaining = self.budget;
    }
}

/// Fixed-period timer bounded by a call budget.
///
/// Used on acceptor loops where no progress means "sleep, don't spin".
pub struct Periodic<T: TimeProvider> {
    time: T,
    period: Duration,
    budget: u64,
    remaining: u64,
}

impl<T: TimeProvider> Periodic<T> {
    /// Unbounded 1 ms ticker.
    pub fn new(time: T) -> Self {
        Self::with(time, Duration::from_millis(1), u64::MAX)
    }

    /// Ticker with an explicit period and budget.
    pub fn with(time: T, period: Duration, budget: u64) -> Self {
        Self {
            time,
            period,
            budget,
            remaining: budget,
        }
    }
}

#[async_trait(?Send)]
impl<T: TimeProvider> Idler for Periodic<T> {
    async fn idle(&mut self) -> TransportResult<()> {
        if self.remaining == 0 {
            return Err(TransportError::Overloaded);
        }
        self.remaining -= 1;
        self.time.sleep(self.period).await;
        Ok(())
    }

    fn reset(&mut self) {
        self.remaining = self.budget;
    }
}

/// Factory producing [`Backoff`] idlers over `time`.
pub fn backoff_factory<T: TimeProvider + 'static>(time: T, config: BackoffConfig) -> IdlerFactory {
    Rc::new(move || Box::new(Backoff::with_config(time.clone(), config.clone())))
}

/// Factory producing unbounded [`Periodic`] idlers over `time`.
pub fn periodic_factory<T: TimeProvider + 'static>(time: T, period: Duration) -> IdlerFactory {
    Rc::new(move || Box::new(Periodic::with(time.clone(), period, u64::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Time provider that records requested sleeps and returns at once.
    #[derive(Clone, Default)]
    struct RecordingTime {
        sleeps: Rc<RefCell<Vec<Duration>>>,
    }

    #[async_trait(?Send)]
    impl TimeProvider for RecordingTime {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }

        fn now(&self) -> Duration {
            Duration::ZERO
        }

        async fn timeout<F, T>(&self, _duration: Duration, future: F) -> Result<T, weft_core::TimeError>
        where
            F: std::future::Future<Output = T>,
        {
            Ok(future.await)
        }
    }

    #[tokio::test]
    async fn test_backoff_spins_then_doubles() {
        let time = RecordingTime::default();
        let mut idler = Backoff::new(time.clone());

        for _ in 0..3 {
            idler.idle().await.expect("spin");
        }
        assert!(time.sleeps.borrow().is_empty());

        for _ in 0..4 {
            idler.idle().await.expect("timed");
        }
        assert_eq!(
            *time.sleeps.borrow(),
            vec![
                Duration::from_nanos(1),
                Duration::from_nanos(2),
                Duration::from_nanos(4),
                Duration::from_nanos(8),
            ]
        );
    }

    #[tokio::test]
    async fn test_backoff_caps_after_doubling_budget() {
        let time = RecordingTime::default();
        let config = BackoffConfig {
            spins: 0,
            doublings: 2,
            initial_delay: Duration::from_nanos(1),
        };
        let mut idler = Backoff::with_config(time.clone(), config);

        for _ in 0..4 {
            idler.idle().await.expect("timed");
        }
        // 1 ns, 2 ns, then capped at 4 ns.
        assert_eq!(
            *time.sleeps.borrow(),
            vec![
                Duration::from_nanos(1),
                Duration::from_nanos(2),
                Duration::from_nanos(4),
                Duration::from_nanos(4),
            ]
        );
    }

    #[tokio::test]
    async fn test_backoff_reset_restarts_ladder() {
        let time = RecordingTime::default();
        let config = BackoffConfig {
            spins: 1,
            doublings: 16,
            initial_delay: Duration::from_nanos(1),
        };
        let mut idler = Backoff::with_config(time.clone(), config);

        idler.idle().await.expect("spin");
        idler.idle().await.expect("timed");
        idler.idle().await.expect("timed");

        idler.reset();
        idler.idle().await.expect("spin again");
        idler.idle().await.expect("timed from the start");

        assert_eq!(
            *time.sleeps.borrow(),
            vec![
                Duration::from_nanos(1),
                Duration::from_nanos(2),
                Duration::from_nanos(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_yield_budget_exhaustion() {
        let mut idler = Yield::bounded(3);
        for _ in 0..3 {
            idler.idle().await.expect("within budget");
        }
        assert!(matches!(
            idler.idle().await,
            Err(TransportError::Overloaded)
        ));

        idler.reset();
        idler.idle().await.expect("budget restored");
    }

    #[tokio::test]
    async fn test_periodic_budget_exhaustion() {
        let time = RecordingTime::default();
        let mut idler = Periodic::with(time.clone(), Duration::from_millis(1), 2);

        idler.idle().await.expect("tick");
        idler.idle().await.expect("tick");
        assert!(matches!(
            idler.idle().await,
            Err(TransportError::Overloaded)
        ));
        assert_eq!(time.sleeps.borrow().len(), 2);
    }

    #[tokio::test]
    async fn test_factories_hand_out_fresh_idlers() {
        let time = RecordingTime::default();
        let factory = backoff_factory(time.clone(), BackoffConfig {
            spins: 0,
            doublings: 16,
            initial_delay: Duration::from_nanos(1),
        });

        let mut first = factory();
        first.idle().await.expect("idle");
        first.idle().await.expect("idle");

        // A second idler starts back at the initial delay.
        let mut second = factory();
        second.idle().await.expect("idle");
        assert_eq!(
            *time.sleeps.borrow(),
            vec![
                Duration::from_nanos(1),
                Duration::from_nanos(2),
                Duration::from_nanos(1),
            ]
        );
    }
}
