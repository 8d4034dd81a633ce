use tokio::{
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, info};

use super::{Ingest, IngestError, IngestHandle};
use crate::{
    config::ConstructionError,
    runtime::{Lifecycle, Managed, ProcessShutdown},
    RuntimeConfiguration,
};

/// Point-in-time view of a [`SumAggregator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SumSnapshot {
    /// Running sum of every value folded so far.
    pub sum: i64,

    /// Number of values folded so far.
    pub applied: u64,
}

impl SumSnapshot {
    fn fold(self, value: i64) -> Self {
        Self {
            sum: self.sum.wrapping_add(value),
            applied: self.applied + 1,
        }
    }
}

/// Aggregator that keeps a running sum of every value it receives.
///
/// Values are queued through [`ingest`][Ingest::ingest] and folded, one at a time and in the order they were queued, by
/// the aggregator's own loop once it has been started. Nothing else ever touches the sum: callers can only read the
/// latest [`SumSnapshot`] published by the loop.
///
/// Once the loop has exited, the queue is closed and further values are rejected with [`IngestError::Closed`].
pub struct SumAggregator {
    lifecycle: Lifecycle,
    ingest: IngestHandle,
    snapshot_rx: watch::Receiver<SumSnapshot>,
}

impl SumAggregator {
    /// Creates a new `SumAggregator` whose inbound queue holds up to `queue_capacity` values.
    ///
    /// # Errors
    ///
    /// If `queue_capacity` is zero, an error is returned.
    pub fn new(queue_capacity: usize) -> Result<Self, ConstructionError> {
        if queue_capacity == 0 {
            return Err(ConstructionError::InvalidQueueCapacity {
                capacity: queue_capacity,
            });
        }

        let lifecycle = Lifecycle::new("sum_aggregator")?;
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(SumSnapshot::default());
        lifecycle.set_task(move |process_shutdown| run_aggregator(rx, snapshot_tx, process_shutdown));

        Ok(Self {
            lifecycle,
            ingest: IngestHandle::new(tx),
            snapshot_rx,
        })
    }

    /// Creates a new `SumAggregator` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configured queue capacity is zero, an error is returned.
    pub fn from_configuration(config: &RuntimeConfiguration) -> Result<Self, ConstructionError> {
        Self::new(config.queue_capacity)
    }

    /// Returns a handle that producers can use to feed this aggregator.
    pub fn ingest_handle(&self) -> IngestHandle {
        self.ingest.clone()
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> SumSnapshot {
        *self.snapshot_rx.borrow()
    }

    /// Returns a receiver that is notified each time a value is folded.
    pub fn watch(&self) -> watch::Receiver<SumSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Returns the number of values waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.ingest.queue_len()
    }
}

impl Ingest for SumAggregator {
    fn ingest(&self, value: i64) -> Result<(), IngestError> {
        self.ingest.ingest(value)
    }
}

impl Managed for SumAggregator {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn signal_stop(&self) -> bool {
        info!("Shutting down sum aggregator.");
        self.lifecycle.signal_stop()
    }
}

async fn run_aggregator(
    mut rx: mpsc::Receiver<i64>, snapshot_tx: watch::Sender<SumSnapshot>, mut process_shutdown: ProcessShutdown,
) {
    info!("Sum aggregator started.");

    let mut snapshot = SumSnapshot::default();
    loop {
        select! {
            biased;

            _ = process_shutdown.wait_for_shutdown() => break,
            maybe_value = rx.recv() => match maybe_value {
                Some(value) => {
                    let previous_sum = snapshot.sum;
                    snapshot = snapshot.fold(value);
                    debug!(value, previous_sum, sum = snapshot.sum, "Folded value into sum.");

                    snapshot_tx.send_replace(snapshot);
                },
                None => break,
            },
        }
    }

    info!(sum = snapshot.sum, applied = snapshot.applied, "Sum aggregator stopped.");
}
