//! Logging.

use std::path::Path;

use tally_error::{generic_error, GenericError};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::LoggingConfiguration;

mod layer;
use self::layer::build_formatting_layer;

/// Keeps the background log writers alive.
///
/// Must be held until the process is about to exit: dropping it flushes any buffered log lines and stops the writer
/// threads.
#[derive(Default)]
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
///
/// Intended for failures that happen before logging is available.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the global `tracing` subscriber.
///
/// One output layer is built per configured destination (console, file), and level filtering is applied once on top of
/// all of them.
///
/// # Errors
///
/// If the log file cannot be opened, or if a global subscriber was already installed, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let mut configured_layers = Vec::new();
    let mut logging_guard = LoggingGuard::default();

    if config.log_to_console {
        let (nb_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, nb_stdout, true));
    }

    if !config.log_file.is_empty() {
        let log_file = Path::new(&config.log_file);
        let file_name = log_file
            .file_name()
            .ok_or_else(|| generic_error!("Log file path '{}' has no file name.", config.log_file))?;
        let directory = log_file.parent().unwrap_or_else(|| Path::new("."));

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name.to_string_lossy())
            .build(directory)
            .map_err(|e| generic_error!("Failed to build log file appender: {}", e))?;
        let (nb_appender, guard) = tracing_appender::non_blocking(appender);
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, nb_appender, false));
    }

    tracing_subscriber::registry()
        .with(configured_layers.with_filter(config.env_filter()))
        .try_init()?;

    Ok(logging_guard)
}
