//! Runtime system.
//!
//! Every background task in this crate is a **unit**: a single asynchronous task with a uniform start / stop / await
//! contract, provided by [`Lifecycle`]. Aggregators and workers differ only in the body they bind to their lifecycle.
//!
//! # Lifecycle
//!
//! A unit moves through four states:
//!
//! ```text
//! Unstarted --start()--> Running --signal_stop()--> StopSignaled --body returns--> Exited
//!                           \-------------------body returns on its own---------------/
//! ```
//!
//! A unit signaled to stop before it was ever started goes straight to `Exited`, and its body never runs.
//!
//! Starting is exactly-once: concurrent or repeated calls launch the body a single time. Signaling stop is idempotent
//! and never blocks. Awaiting completion can be done from any number of callers, in any state, and resolves once the
//! body has returned.
//!
//! Cancellation is cooperative. The body is handed a [`ProcessShutdown`] and is expected to poll it at each of its wait
//! points; long synchronous work between wait points delays shutdown, and nothing preempts a body that never looks.
//!
//! # Coordinated shutdown
//!
//! [`ShutdownCoordinator`] holds a heterogeneous list of [`Managed`] units. On shutdown it signals every unit first and
//! only then awaits them all concurrently, so a slow unit never delays the moment a fast one learns it should stop. By
//! default each await is unbounded; a [`ShutdownStrategy::Bounded`] strategy instead aborts any unit that overruns its
//! deadline and reports it as a failure.

mod coordinator;
pub use self::coordinator::{CoordinatorError, Managed, ShutdownCoordinator, ShutdownStrategy};

mod lifecycle;
pub use self::lifecycle::{Lifecycle, LifecycleState, ShutdownError, TaskFuture};

mod process;
pub use self::process::UnitId;

mod shutdown;
pub use self::shutdown::{ProcessShutdown, ShutdownHandle};
