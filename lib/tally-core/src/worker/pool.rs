use std::sync::Arc;

use tracing::info;

use super::{Counter, CounterSettings};
use crate::{aggregate::Ingest, config::ConstructionError, runtime::Managed, RuntimeConfiguration};

/// A fixed-size pool of counters feeding the same aggregator.
///
/// Counters are numbered `0` through `size - 1`. Each one only holds the ingestion capability it was given, and knows
/// nothing about the others.
pub struct WorkerPool {
    counters: Vec<Arc<Counter>>,
}

impl WorkerPool {
    /// Creates a new `WorkerPool` of `size` counters, none of which are started.
    ///
    /// # Errors
    ///
    /// If the settings are invalid, an error is returned.
    pub fn new(size: usize, ingest: Arc<dyn Ingest>, settings: &CounterSettings) -> Result<Self, ConstructionError> {
        settings.validate()?;

        let counters = (0..size)
            .map(|id| Counter::new(id, Arc::clone(&ingest), settings.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { counters })
    }

    /// Creates a new `WorkerPool` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn from_configuration(
        config: &RuntimeConfiguration, ingest: Arc<dyn Ingest>,
    ) -> Result<Self, ConstructionError> {
        Self::new(config.pool_size, ingest, &config.counter_settings())
    }

    /// Starts every counter.
    pub fn start_all(&self) {
        for counter in &self.counters {
            counter.start();
        }
        info!(counters = self.counters.len(), "Started worker pool.");
    }

    /// Returns the number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if the pool has no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Returns the counters.
    pub fn counters(&self) -> &[Arc<Counter>] {
        &self.counters
    }

    /// Returns every counter as a managed unit.
    pub fn units(&self) -> impl Iterator<Item = Arc<dyn Managed>> + '_ {
        self.counters.iter().map(|counter| Arc::clone(counter) as Arc<dyn Managed>)
    }
}
