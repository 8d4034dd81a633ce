use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use snafu::Snafu;
use tracing::{debug, error, info};

use super::lifecycle::{Lifecycle, ShutdownError};

/// Coordinator errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CoordinatorError {
    /// One or more units failed to shut down cleanly.
    #[snafu(display("{} unit(s) failed to shut down cleanly: {}", failures.len(), format_failures(failures)))]
    UnitsFailed {
        /// The failure reported by each unit that did not shut down cleanly.
        failures: Vec<ShutdownError>,
    },
}

fn format_failures(failures: &[ShutdownError]) -> String {
    failures.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(" ")
}

/// A unit that can be started, stopped, and awaited.
///
/// Anything built on a [`Lifecycle`] can be managed by exposing it through [`lifecycle`][Self::lifecycle]. Types can
/// override `start` and `signal_stop` to add their own logging, but should always delegate to the lifecycle.
pub trait Managed: Send + Sync {
    /// Returns the lifecycle backing this unit.
    fn lifecycle(&self) -> &Lifecycle;

    /// Returns the name of the unit.
    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    /// Starts the unit.
    fn start(&self) -> bool {
        self.lifecycle().start()
    }

    /// Signals the unit to stop.
    fn signal_stop(&self) -> bool {
        self.lifecycle().signal_stop()
    }
}

impl Managed for Lifecycle {
    fn lifecycle(&self) -> &Lifecycle {
        self
    }
}

/// Strategy for awaiting units during shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownStrategy {
    /// Waits as long as it takes for every unit to exit.
    ///
    /// A unit that never observes its done-signal blocks shutdown forever.
    #[default]
    Indefinite,

    /// Waits up to the given duration for each unit to exit, and aborts it otherwise.
    Bounded(Duration),
}

/// Starts, stops, and awaits a set of managed units.
///
/// Units are started in the order they were added. On shutdown, every unit is signaled before any of them is awaited,
/// and all of them are then awaited concurrently, so the time to shut down is that of the slowest unit rather than the
/// sum of all of them.
pub struct ShutdownCoordinator {
    units: Vec<Arc<dyn Managed>>,
    strategy: ShutdownStrategy,
}

impl ShutdownCoordinator {
    /// Creates an empty `ShutdownCoordinator` that waits indefinitely for units to exit.
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            strategy: ShutdownStrategy::default(),
        }
    }

    /// Sets the strategy used to await units during shutdown.
    pub fn with_shutdown_strategy(mut self, strategy: ShutdownStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Adds a unit.
    pub fn add_unit(&mut self, unit: Arc<dyn Managed>) {
        debug!(unit_name = unit.name(), "Adding unit to coordinator.");
        self.units.push(unit);
    }

    /// Adds several units.
    pub fn add_units<I>(&mut self, units: I)
    where
        I: IntoIterator<Item = Arc<dyn Managed>>,
    {
        for unit in units {
            self.add_unit(unit);
        }
    }

    /// Returns the number of managed units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if there are no managed units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Starts every unit, in the order they were added.
    pub fn start_all(&self) {
        for unit in &self.units {
            unit.start();
        }
        info!(units = self.units.len(), "Started all managed units.");
    }

    /// Stops every unit and waits for all of them to exit.
    ///
    /// # Errors
    ///
    /// If any unit fails to shut down cleanly, an error is returned listing every such failure. Units that did shut
    /// down cleanly are still awaited to completion.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        info!(units = self.units.len(), "Shutting down all managed units...");

        for unit in &self.units {
            unit.signal_stop();
        }

        let strategy = self.strategy;
        let results = join_all(self.units.iter().map(|unit| async move {
            let lifecycle = unit.lifecycle();
            let result = match strategy {
                ShutdownStrategy::Indefinite => lifecycle.await_completion().await,
                ShutdownStrategy::Bounded(timeout) => lifecycle.await_completion_with_timeout(timeout).await,
            };

            match &result {
                Ok(()) => debug!(unit_name = lifecycle.name(), "Unit exited."),
                Err(e) => error!(unit_name = lifecycle.name(), error = %e, "Unit failed to shut down cleanly."),
            }
            result
        }))
        .await;

        let failures = results.into_iter().filter_map(Result::err).collect::<Vec<_>>();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoordinatorError::UnitsFailed { failures })
        }
    }

    /// Waits for `signal` to resolve, and then shuts down every unit.
    ///
    /// Units are expected to have been started already.
    ///
    /// # Errors
    ///
    /// If any unit fails to shut down cleanly, an error is returned.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), CoordinatorError>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::{sleep, Instant};

    use super::*;
    use crate::runtime::LifecycleState;

    fn sleepy_unit(name: &str, cleanup: Duration) -> Arc<Lifecycle> {
        let lifecycle = Lifecycle::new(name).unwrap();
        lifecycle.set_task(move |mut process_shutdown| async move {
            process_shutdown.wait_for_shutdown().await;
            sleep(cleanup).await;
        });
        Arc::new(lifecycle)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_and_fast_units_stop_concurrently() {
        let units = [
            sleepy_unit("fast", Duration::from_millis(10)),
            sleepy_unit("medium", Duration::from_secs(3)),
            sleepy_unit("slow", Duration::from_secs(8)),
        ];

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.add_units(units.iter().map(|unit| Arc::clone(unit) as Arc<dyn Managed>));
        assert_eq!(coordinator.len(), 3);
        coordinator.start_all();

        let started = Instant::now();
        coordinator.shutdown().await.unwrap();
        let elapsed = started.elapsed();

        // Serial awaiting would take the sum of all cleanup delays.
        assert!(elapsed >= Duration::from_secs(8));
        assert!(elapsed < Duration::from_secs(9));

        for unit in &units {
            assert_eq!(unit.state(), LifecycleState::Exited);
            assert!(unit.is_finished());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_strategy_reports_stuck_units() {
        let stuck = Lifecycle::new("stuck").unwrap();
        stuck.set_task(|_| std::future::pending::<()>());

        let mut coordinator =
            ShutdownCoordinator::new().with_shutdown_strategy(ShutdownStrategy::Bounded(Duration::from_secs(1)));
        coordinator.add_unit(Arc::new(stuck));
        coordinator.add_unit(sleepy_unit("well_behaved", Duration::from_millis(100)));
        coordinator.start_all();

        match coordinator.shutdown().await {
            Err(CoordinatorError::UnitsFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    &failures[0],
                    ShutdownError::TimedOut { unit_name, .. } if unit_name == "stuck"
                ));
            }
            other => panic!("expected a timed out unit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_waits_for_signal() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = Lifecycle::new("ticker").unwrap();
        let body_runs = Arc::clone(&runs);
        lifecycle.set_task(move |mut process_shutdown| async move {
            loop {
                tokio::select! {
                    _ = process_shutdown.wait_for_shutdown() => break,
                    _ = sleep(Duration::from_secs(1)) => {
                        body_runs.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });
        let lifecycle = Arc::new(lifecycle);

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.add_unit(Arc::clone(&lifecycle) as Arc<dyn Managed>);
        coordinator.start_all();

        coordinator
            .run_until(sleep(Duration::from_millis(3500)))
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
    }

    #[tokio::test]
    async fn empty_coordinator_shuts_down_immediately() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.is_empty());

        coordinator.start_all();
        coordinator.shutdown().await.unwrap();
    }
}
