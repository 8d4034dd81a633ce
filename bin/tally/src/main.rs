//! Runs a supervised pool of counters that feed a single aggregator, and shuts everything down cleanly on SIGINT or
//! SIGTERM.

#![deny(missing_docs)]

use std::sync::Arc;

use clap::Parser as _;
use tally_app::prelude::*;
use tally_config::GenericConfiguration;
use tally_core::{
    aggregate::SumAggregator,
    runtime::{Managed, ShutdownCoordinator},
    worker::WorkerPool,
    RuntimeConfiguration,
};
use tally_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

mod config;
use self::config::{load_configuration, Cli};

mod signals;
use self::signals::wait_for_termination_signal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(cli.config.as_deref())
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:?}", e)));

    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load logging configuration: {:?}", e)))
        .with_default_level(cli.log_level());
    let logging_guard = initialize_logging(&logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {:?}", e)));

    let exit_code = match run(&configuration).await {
        Ok(()) => {
            info!("Successfully shut down all managed units.");
            0
        }
        Err(e) => {
            error!("{:?}", e);
            1
        }
    };

    // Flush any buffered log lines before exiting.
    drop(logging_guard);
    std::process::exit(exit_code);
}

async fn run(configuration: &GenericConfiguration) -> Result<(), GenericError> {
    let runtime_config = RuntimeConfiguration::from_configuration(configuration)?;
    info!(
        pool_size = runtime_config.pool_size,
        queue_capacity = runtime_config.queue_capacity,
        "Starting tally."
    );

    let aggregator = SumAggregator::from_configuration(&runtime_config)
        .map(Arc::new)
        .error_context("Failed to create aggregator.")?;
    let pool = WorkerPool::from_configuration(&runtime_config, Arc::new(aggregator.ingest_handle()))
        .error_context("Failed to create worker pool.")?;

    let mut coordinator = ShutdownCoordinator::new().with_shutdown_strategy(runtime_config.shutdown_strategy());
    coordinator.add_unit(Arc::clone(&aggregator) as Arc<dyn Managed>);
    coordinator.add_units(pool.units());
    coordinator.start_all();

    let shutdown_result = coordinator.run_until(wait_for_termination_signal()).await;

    let snapshot = aggregator.snapshot();
    info!(sum = snapshot.sum, applied = snapshot.applied, "Final aggregate.");

    shutdown_result.error_context("Failed to shut down all managed units.")
}
