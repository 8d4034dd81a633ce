use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_error::{generic_error, ErrorContext as _, GenericError};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

const fn default_true() -> bool {
    true
}

/// Logging configuration.
///
/// Read from the top level of the application configuration:
///
/// - `log_level`: filtering directives, in `EnvFilter` syntax (`info`, `tally_core=debug,info`, ...). When unset, the
///   level passed to [`with_default_level`][Self::with_default_level] is used, or `info` otherwise.
/// - `log_format_json`: emit JSON lines instead of human-readable output. Defaults to `false`.
/// - `log_to_console`: write to standard output. Defaults to `true`.
/// - `log_file`: path to additionally write logs to. Disabled when empty, which is the default.
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfiguration {
    #[serde(default)]
    log_level: Option<LogLevel>,

    #[serde(default)]
    pub(super) log_format_json: bool,

    #[serde(default = "default_true")]
    pub(super) log_to_console: bool,

    #[serde(default)]
    pub(super) log_file: String,

    #[serde(skip, default = "default_level")]
    default_level: LevelFilter,
}

const fn default_level() -> LevelFilter {
    LevelFilter::INFO
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the logging settings are present but invalid, such as an unparseable `log_level`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        config
            .as_typed::<Self>()
            .error_context("Failed to load logging configuration.")
    }

    /// Sets the level used when `log_level` is not explicitly configured.
    pub fn with_default_level(mut self, level: LevelFilter) -> Self {
        self.default_level = level;
        self
    }

    pub(super) fn env_filter(&self) -> EnvFilter {
        match &self.log_level {
            Some(level) => EnvFilter::new(&level.0),
            None => EnvFilter::default().add_directive(self.default_level.into()),
        }
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: None,
            log_format_json: false,
            log_to_console: true,
            log_file: String::new(),
            default_level: default_level(),
        }
    }
}

/// Filtering directives, validated at load time.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "String")]
struct LogLevel(String);

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(&value)
            .error_context("Failed to parse valid log level.")?;

        Ok(Self(value))
    }
}
