//! Workers.
//!
//! Workers are the producers of the system. Each one runs on its own [`Lifecycle`][crate::runtime::Lifecycle] and is
//! only given an [`Ingest`][crate::aggregate::Ingest] capability to hand its values over.

mod counter;
pub use self::counter::{Counter, CounterSettings};

mod pool;
pub use self::pool::WorkerPool;
