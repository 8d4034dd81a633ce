//! Loading and querying layered configuration.
#![deny(missing_docs)]

use std::{borrow::Cow, sync::Arc};

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tally_error::GenericError;
use tracing::debug;

mod provider;
use self::provider::FileProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A configuration file could not be read or parsed.
    #[snafu(display("Failed to load configuration file: {}", source))]
    File {
        /// Error source.
        source: figment::Error,
    },

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Name of the missing field.
        field: Cow<'static, str>,

        /// Hint on how the field can be set.
        help_text: String,
    },

    /// Requested field held a value of the wrong type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Any other failure while extracting configuration.
    #[snafu(display("Failed to query configuration: {}", source))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl ConfigurationError {
    fn from_figment(e: figment::Error, env_prefix: Option<&str>) -> Self {
        match e.kind {
            Kind::MissingField(field) => {
                let help_text = match env_prefix {
                    Some(prefix) => format!(
                        "Try setting it in the configuration file, or via the `{}{}` environment variable.",
                        prefix,
                        field.replace('.', "_").to_uppercase()
                    ),
                    None => "Try setting it in the configuration file.".to_string(),
                };
                Self::MissingField { field, help_text }
            }
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e.into() },
        }
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        self.0.data()
    }
}

/// Builds configuration from an ordered set of sources.
///
/// Sources added later take precedence over sources added earlier, so the usual order is: configuration file first,
/// then environment variables.
///
/// # Supported sources
///
/// - YAML file
/// - JSON file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
#[derive(Default)]
pub struct ConfigurationLoader {
    env_prefix: Option<String>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let provider = FileProvider::yaml(path).context(File)?;
        self.providers.push(BoxedProvider(Box::new(provider)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    pub fn try_from_yaml<P>(self, path: P) -> Self
    where
        P: AsRef<std::path::Path>,
    {
        let path = path.as_ref();
        match FileProvider::yaml(path) {
            Ok(provider) => self.with_provider(provider),
            Err(e) => {
                debug!(error = %e, file_path = %path.display(), "Unable to read YAML configuration file. Ignoring.");
                self
            }
        }
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid JSON, an error will be returned.
    pub fn from_json<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let provider = FileProvider::json(path).context(File)?;
        self.providers.push(BoxedProvider(Box::new(provider)));
        Ok(self)
    }

    /// Loads configuration from environment variables.
    ///
    /// Only variables starting with the prefix are considered. An underscore is appended to the prefix if it does not
    /// already end with one, and the prefix is stripped from the resulting keys, which are lowercased: with a prefix of
    /// `TALLY`, `TALLY_POOL_SIZE=4` becomes `pool_size: 4`.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` holds non-`Send` filter closures, so snapshot its values now instead of storing the provider itself.
        let values = Env::prefixed(&prefix)
            .data()
            .map_err(|e| ConfigurationError::from_figment(e, None))?;
        if let Some(dict) = values.get(&Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(dict.clone()))));
        }

        self.env_prefix = Some(prefix);
        Ok(self)
    }

    fn with_provider<P>(mut self, provider: P) -> Self
    where
        P: Provider + Send + Sync + 'static,
    {
        self.providers.push(BoxedProvider(Box::new(provider)));
        self
    }

    /// Consumes the loader, merging every source into a [`GenericConfiguration`].
    pub fn into_generic(self) -> GenericConfiguration {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        GenericConfiguration {
            inner: Arc::new(Inner {
                figment,
                env_prefix: self.env_prefix,
            }),
        }
    }

    /// Consumes the loader, deserializing the merged configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn into_typed<T>(self) -> Result<T, ConfigurationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.into_generic().as_typed()
    }
}

struct Inner {
    figment: Figment,
    env_prefix: Option<String>,
}

/// Merged configuration, queryable by key.
///
/// Keys are in the form `a.b.c`, where each period denotes one level of nesting.
#[derive(Clone)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn map_error(&self, e: figment::Error) -> ConfigurationError {
        ConfigurationError::from_figment(e, self.inner.env_prefix.as_deref())
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist, or the value cannot be deserialized as `T`, an error is returned.
    pub fn get_typed<T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.inner.figment.extract_inner(key).map_err(|e| self.map_error(e))
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but the value cannot be deserialized as `T`, an error is returned.
    pub fn try_get_typed<T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.inner.figment.contains(key) {
            return Ok(None);
        }

        self.get_typed(key).map(Some)
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `T`, an error is returned.
    pub fn as_typed<T>(&self) -> Result<T, ConfigurationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.inner.figment.extract().map_err(|e| self.map_error(e))
    }
}
