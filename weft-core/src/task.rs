//! Task spawning abstraction for the single-threaded event loop.
//!
//! Long-running loops (connector responses, connection drivers) are spawned
//! through this seam. Futures are `!Send`: the transport runs one event
//! loop per peer and shares state through `Rc`, so tasks must stay on the
//! spawning thread.

use std::future::Future;

/// Provider for spawning named local tasks.
pub trait TaskProvider: Clone {
    /// Spawn a named task on the current thread.
    ///
    /// The name shows up in trace logs only; it carries no scheduling
    /// meaning.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
///
/// Requires a `tokio::task::LocalSet` context; spawning outside one panics,
/// which is the same contract `spawn_local` itself has.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!(task = %task_name, "task starting");
            future.await;
            tracing::trace!(task = %task_name, "task completed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_spawn_task_runs_on_local_set() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ran = Rc::new(Cell::new(false));
                let flag = ran.clone();
                let handle = TokioTaskProvider.spawn_task("probe", async move {
                    flag.set(true);
                });
                handle.await.expect("join");
                assert!(ran.get());
            })
            .await;
    }
}
