//! Aggregation.
//!
//! An aggregator owns its state outright and is the only thing that ever mutates it. Producers never see the aggregator
//! itself: they are given an [`Ingest`] capability, which hands a value over without blocking and reports
//! [`IngestError::QueueFull`] when the aggregator is falling behind.

use snafu::Snafu;
use tokio::sync::mpsc;

mod sum;
pub use self::sum::{SumAggregator, SumSnapshot};

/// Ingestion errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum IngestError {
    /// The inbound queue was full, and the value was dropped.
    #[snafu(display("Aggregator queue is full (capacity {}). Value dropped.", capacity))]
    QueueFull {
        /// Capacity of the queue.
        capacity: usize,
    },

    /// The aggregator has exited, and no longer accepts values.
    #[snafu(display("Aggregator has exited. Value dropped."))]
    Closed,
}

/// A sink for values.
pub trait Ingest: Send + Sync {
    /// Hands `value` over, without waiting for space.
    ///
    /// # Errors
    ///
    /// If the value cannot be accepted right now, an error is returned and the value is dropped. Callers are expected
    /// to carry on.
    fn ingest(&self, value: i64) -> Result<(), IngestError>;
}

/// A cloneable handle for feeding values into an aggregator's inbound queue.
#[derive(Clone, Debug)]
pub struct IngestHandle {
    tx: mpsc::Sender<i64>,
}

impl IngestHandle {
    pub(crate) fn new(tx: mpsc::Sender<i64>) -> Self {
        Self { tx }
    }

    fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl Ingest for IngestHandle {
    fn ingest(&self, value: i64) -> Result<(), IngestError> {
        self.tx.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngestError::QueueFull {
                capacity: self.tx.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => IngestError::Closed,
        })
    }
}
