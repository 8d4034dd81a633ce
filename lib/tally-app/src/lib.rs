//! Process bootstrap helpers.
//!
//! Everything an entrypoint needs to do before it starts running managed units: currently, setting up logging.
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration, LoggingGuard};
}
