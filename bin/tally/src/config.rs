use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use tally_config::{ConfigurationLoader, GenericConfiguration};
use tally_error::{ErrorContext as _, GenericError};
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_PATH: &str = "tally.yaml";
const ENV_PREFIX: &str = "TALLY";

/// Runs a pool of counters feeding a running sum, until interrupted.
#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// When not given, `tally.yaml` in the working directory is used if it exists. Settings can also be overridden
    /// with `TALLY_`-prefixed environment variables, such as `TALLY_POOL_SIZE`.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,
}

impl Cli {
    /// Gets the configured log level based on the user-supplied verbosity level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Loads the configuration from the given file, if any, and from the environment.
///
/// An explicitly given file must exist, while the default file is skipped when it does not.
pub fn load_configuration(config_path: Option<&Path>) -> Result<GenericConfiguration, GenericError> {
    let loader = match config_path {
        Some(path) => ConfigurationLoader::default()
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?,
        None => ConfigurationLoader::default().try_from_yaml(DEFAULT_CONFIG_PATH),
    };

    let configuration = loader
        .from_environment(ENV_PREFIX)
        .error_context("Failed to load configuration from environment.")?
        .into_generic();
    Ok(configuration)
}
