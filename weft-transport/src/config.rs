//! Configuration structures for idling and handshake behavior.

use std::time::Duration;

/// Configuration for the exponential back-off idle strategy.
///
/// The strategy spins first, then sleeps with a doubling delay until the
/// doubling budget runs out, after which the delay stays at the cap.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Number of immediate (spin) retries before the first timed wait.
    pub spins: u16,

    /// Number of times the delay doubles before staying at the cap.
    pub doublings: u16,

    /// Delay of the first timed wait.
    pub initial_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // 1 ns doubled 16 times caps near 65 µs.
        Self {
            spins: 3,
            doublings: 16,
            initial_delay: Duration::from_nanos(1),
        }
    }
}

/// Configuration for connector behavior.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Pause before the response loop retries after a failed iteration.
    pub response_pause: Duration,

    /// Period of the idle wait while the response subscription has no
    /// pending image.
    pub receive_period: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            response_pause: Duration::from_micros(100),
            receive_period: Duration::from_millis(1),
        }
    }
}
