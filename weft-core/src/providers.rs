//! Provider bundle trait for simplified type parameters.
//!
//! Transport components need a fabric connection, a time source and a task
//! spawner. Carrying three type parameters through every struct gets noisy;
//! the [`Providers`] bundle collapses them into one, the same way the rest
//! of this crate groups its environment seams.

use crate::fabric::Fabric;
use crate::task::{TaskProvider, TokioTaskProvider};
use crate::time::{TimeProvider, TokioTimeProvider};

/// Bundle of the provider types one peer runs against.
///
/// The associated types preserve concrete types at compile time; accessor
/// methods hand out the individual providers.
pub trait Providers: Clone + 'static {
    /// Messaging fabric connection type.
    type Fabric: Fabric;

    /// Time provider type for sleeps and timeouts.
    type Time: TimeProvider + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + 'static;

    /// Get the fabric handle.
    fn fabric(&self) -> &Self::Fabric;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Production providers: any fabric paired with the Tokio time and task
/// providers.
#[derive(Clone)]
pub struct TokioProviders<F: Fabric> {
    fabric: F,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl<F: Fabric> TokioProviders<F> {
    /// Bundle `fabric` with fresh Tokio providers.
    pub fn new(fabric: F) -> Self {
        Self {
            fabric,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl<F: Fabric> Providers for TokioProviders<F> {
    type Fabric = F;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn fabric(&self) -> &Self::Fabric {
        &self.fabric
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
