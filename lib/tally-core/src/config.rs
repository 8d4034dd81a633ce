use std::time::Duration;

use serde::Deserialize;
use snafu::Snafu;
use tally_config::GenericConfiguration;
use tally_error::{ErrorContext as _, GenericError};

use crate::{runtime::ShutdownStrategy, worker::CounterSettings};

/// Construction errors.
///
/// Returned while setting up units, before anything has been started.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConstructionError {
    /// Unit name is invalid.
    #[snafu(display("Invalid name for unit: '{}'", name))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Queue capacity is invalid.
    #[snafu(display("Queue capacity must be at least 1, got {}.", capacity))]
    InvalidQueueCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// Range has its bounds the wrong way around.
    #[snafu(display("Invalid range for '{}': minimum ({}) is greater than maximum ({}).", setting, min, max))]
    InvalidRange {
        /// Name of the setting.
        setting: &'static str,

        /// Configured minimum.
        min: String,

        /// Configured maximum.
        max: String,
    },
}

const fn default_pool_size() -> usize {
    10
}

const fn default_queue_capacity() -> usize {
    10
}

const fn default_value_min() -> i64 {
    -5
}

const fn default_value_max() -> i64 {
    4
}

const fn default_delay_min_ms() -> u64 {
    1000
}

const fn default_delay_max_ms() -> u64 {
    10000
}

/// Runtime configuration.
///
/// Every field has a default, so an empty configuration is valid.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfiguration {
    /// Number of counters in the worker pool.
    ///
    /// Defaults to 10. Zero is allowed, and leaves the aggregator running on its own.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Capacity of the aggregator's inbound queue.
    ///
    /// Defaults to 10. Must be at least 1.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Smallest value a counter generates. Defaults to -5.
    #[serde(default = "default_value_min")]
    pub value_min: i64,

    /// Largest value a counter generates. Defaults to 4.
    #[serde(default = "default_value_max")]
    pub value_max: i64,

    /// Shortest delay between two values from the same counter, in milliseconds. Defaults to 1000.
    #[serde(default = "default_delay_min_ms")]
    pub generate_interval_min_ms: u64,

    /// Longest delay between two values from the same counter, in milliseconds. Defaults to 10000.
    #[serde(default = "default_delay_max_ms")]
    pub generate_interval_max_ms: u64,

    /// Shortest time a counter spends cleaning up once stopped, in milliseconds. Defaults to 1000.
    #[serde(default = "default_delay_min_ms")]
    pub cleanup_delay_min_ms: u64,

    /// Longest time a counter spends cleaning up once stopped, in milliseconds. Defaults to 10000.
    #[serde(default = "default_delay_max_ms")]
    pub cleanup_delay_max_ms: u64,

    /// How long to wait for each unit to exit during shutdown, in milliseconds.
    ///
    /// Units still running when this expires are aborted, and shutdown is reported as failed. When unset, which is the
    /// default, shutdown waits as long as it takes.
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,

    /// Seed for the counters' random number generators.
    ///
    /// Each counter mixes its own identifier into the seed, so counters still generate distinct sequences. When unset,
    /// which is the default, generators are seeded from the operating system.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl RuntimeConfiguration {
    /// Creates a new `RuntimeConfiguration` from the given configuration, and validates it.
    ///
    /// # Errors
    ///
    /// If a setting has the wrong type, or the resulting configuration is invalid, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let runtime_config = config
            .as_typed::<Self>()
            .error_context("Failed to load runtime configuration.")?;
        runtime_config
            .validate()
            .error_context("Invalid runtime configuration.")?;

        Ok(runtime_config)
    }

    /// Checks that the queue capacity and every range are usable.
    ///
    /// # Errors
    ///
    /// If the queue capacity is zero, or the minimum of any range is greater than its maximum, an error is returned.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.queue_capacity == 0 {
            return Err(ConstructionError::InvalidQueueCapacity {
                capacity: self.queue_capacity,
            });
        }

        self.counter_settings().validate()
    }

    /// Returns the settings shared by every counter in the pool.
    pub fn counter_settings(&self) -> CounterSettings {
        CounterSettings {
            value_range: self.value_min..=self.value_max,
            generate_interval: Duration::from_millis(self.generate_interval_min_ms)
                ..=Duration::from_millis(self.generate_interval_max_ms),
            cleanup_delay: Duration::from_millis(self.cleanup_delay_min_ms)
                ..=Duration::from_millis(self.cleanup_delay_max_ms),
            seed: self.seed,
        }
    }

    /// Returns the strategy used to await units during shutdown.
    pub fn shutdown_strategy(&self) -> ShutdownStrategy {
        match self.shutdown_timeout_ms {
            Some(timeout_ms) => ShutdownStrategy::Bounded(Duration::from_millis(timeout_ms)),
            None => ShutdownStrategy::Indefinite,
        }
    }
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            value_min: default_value_min(),
            value_max: default_value_max(),
            generate_interval_min_ms: default_delay_min_ms(),
            generate_interval_max_ms: default_delay_max_ms(),
            cleanup_delay_min_ms: default_delay_min_ms(),
            cleanup_delay_max_ms: default_delay_max_ms(),
            shutdown_timeout_ms: None,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tally_config::ConfigurationLoader;

    use super::*;

    fn load_yaml(contents: &str) -> GenericConfiguration {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();

        ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_generic()
    }

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = load_yaml("{}\n");
        let runtime_config = RuntimeConfiguration::from_configuration(&config).unwrap();

        assert_eq!(runtime_config, RuntimeConfiguration::default());
        assert_eq!(runtime_config.shutdown_strategy(), ShutdownStrategy::Indefinite);

        let settings = runtime_config.counter_settings();
        assert_eq!(settings.value_range, -5..=4);
        assert_eq!(
            settings.generate_interval,
            Duration::from_secs(1)..=Duration::from_secs(10)
        );
        assert_eq!(settings.cleanup_delay, Duration::from_secs(1)..=Duration::from_secs(10));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load_yaml(
            "pool_size: 3\nqueue_capacity: 2\nvalue_min: 0\nvalue_max: 0\nshutdown_timeout_ms: 1500\nseed: 42\n",
        );
        let runtime_config = RuntimeConfiguration::from_configuration(&config).unwrap();

        assert_eq!(runtime_config.pool_size, 3);
        assert_eq!(runtime_config.queue_capacity, 2);
        assert_eq!(runtime_config.counter_settings().value_range, 0..=0);
        assert_eq!(runtime_config.seed, Some(42));
        assert_eq!(
            runtime_config.shutdown_strategy(),
            ShutdownStrategy::Bounded(Duration::from_millis(1500))
        );
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let runtime_config = RuntimeConfiguration {
            queue_capacity: 0,
            ..Default::default()
        };

        assert!(matches!(
            runtime_config.validate(),
            Err(ConstructionError::InvalidQueueCapacity { capacity: 0 })
        ));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let runtime_config = RuntimeConfiguration {
            cleanup_delay_min_ms: 500,
            cleanup_delay_max_ms: 100,
            ..Default::default()
        };

        assert!(matches!(
            runtime_config.validate(),
            Err(ConstructionError::InvalidRange { setting: "cleanup_delay", .. })
        ));

        let config = load_yaml("value_min: 10\nvalue_max: -10\n");
        assert!(RuntimeConfiguration::from_configuration(&config).is_err());
    }

    #[test]
    fn zero_pool_size_is_allowed() {
        let config = load_yaml("pool_size: 0\n");
        let runtime_config = RuntimeConfiguration::from_configuration(&config).unwrap();
        assert_eq!(runtime_config.pool_size, 0);
    }
}
