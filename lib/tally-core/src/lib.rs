//! Core primitives for running a supervised pool of producers feeding a single aggregator.
//!
//! - [`runtime`]: the lifecycle primitive every background task is built on, plus the coordinator that stops and awaits
//!   a set of them.
//! - [`aggregate`]: the single-consumer aggregator and the narrow ingestion capability producers are given.
//! - [`worker`]: the producers themselves, and the fixed-size pool they are created in.
#![deny(missing_docs)]

pub mod aggregate;

mod config;
pub use self::config::{ConstructionError, RuntimeConfiguration};

pub mod runtime;
pub mod worker;
