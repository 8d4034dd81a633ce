use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use rand::{rngs::SmallRng, Rng as _, SeedableRng as _};
use tokio::{
    pin, select,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    aggregate::Ingest,
    config::ConstructionError,
    runtime::{Lifecycle, Managed, ProcessShutdown},
};

/// Settings for a [`Counter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterSettings {
    /// Range that generated values are drawn from.
    pub value_range: RangeInclusive<i64>,

    /// Range that the delay before each value is drawn from.
    pub generate_interval: RangeInclusive<Duration>,

    /// Range that the cleanup delay, once stopped, is drawn from.
    pub cleanup_delay: RangeInclusive<Duration>,

    /// Seed for the random number generator, or `None` to seed from the operating system.
    pub seed: Option<u64>,
}

impl CounterSettings {
    /// Checks that no range has its minimum above its maximum.
    ///
    /// # Errors
    ///
    /// If any range is inverted, an error is returned naming it.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        check_range("value", &self.value_range)?;
        check_range("generate_interval", &self.generate_interval)?;
        check_range("cleanup_delay", &self.cleanup_delay)
    }
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            value_range: -5..=4,
            generate_interval: Duration::from_secs(1)..=Duration::from_secs(10),
            cleanup_delay: Duration::from_secs(1)..=Duration::from_secs(10),
            seed: None,
        }
    }
}

fn check_range<T>(setting: &'static str, range: &RangeInclusive<T>) -> Result<(), ConstructionError>
where
    T: PartialOrd + std::fmt::Debug,
{
    if range.start() > range.end() {
        return Err(ConstructionError::InvalidRange {
            setting,
            min: format!("{:?}", range.start()),
            max: format!("{:?}", range.end()),
        });
    }

    Ok(())
}

/// A producer that periodically hands a random value to an aggregator.
///
/// After each randomized delay, a counter draws a value and ingests it. Rejected values are logged and dropped. Once
/// stopped, a counter spends a randomized cleanup delay before it exits.
pub struct Counter {
    id: usize,
    lifecycle: Lifecycle,
}

impl Counter {
    /// Creates a new `Counter` that feeds `ingest`.
    ///
    /// The counter is not started.
    ///
    /// # Errors
    ///
    /// If the settings are invalid, an error is returned.
    pub fn new(id: usize, ingest: Arc<dyn Ingest>, settings: CounterSettings) -> Result<Self, ConstructionError> {
        settings.validate()?;

        let rng = match settings.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => SmallRng::from_os_rng(),
        };

        let lifecycle = Lifecycle::new(&format!("counter_{}", id))?;
        lifecycle.set_task(move |process_shutdown| run_counter(ingest, settings, rng, process_shutdown));

        Ok(Self { id, lifecycle })
    }

    /// Returns the counter's identifier within its pool.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Managed for Counter {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn signal_stop(&self) -> bool {
        info!(counter_id = self.id, "Shutting down counter.");
        self.lifecycle.signal_stop()
    }
}

async fn run_counter(
    ingest: Arc<dyn Ingest>, settings: CounterSettings, mut rng: SmallRng, mut process_shutdown: ProcessShutdown,
) {
    debug!("Counter started.");

    let next_value = sleep(rng.random_range(settings.generate_interval.clone()));
    pin!(next_value);

    loop {
        select! {
            biased;

            _ = process_shutdown.wait_for_shutdown() => {
                let cleanup_delay = rng.random_range(settings.cleanup_delay.clone());
                debug!(?cleanup_delay, "Counter cleaning up before exit.");

                sleep(cleanup_delay).await;
                info!("Counter stopped.");
                return;
            },
            _ = &mut next_value => {
                let value = rng.random_range(settings.value_range.clone());
                debug!(value, "Generated value.");

                if let Err(e) = ingest.ingest(value) {
                    warn!(value, error = %e, "Unable to hand value to aggregator.");
                }

                let delay = rng.random_range(settings.generate_interval.clone());
                next_value.as_mut().reset(Instant::now() + delay);
            },
        }
    }
}
