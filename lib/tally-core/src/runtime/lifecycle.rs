use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use snafu::Snafu;
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument as _};

use super::{
    process::{UnitId, UnitIdentity},
    shutdown::{ProcessShutdown, ShutdownHandle},
};
use crate::config::ConstructionError;

/// A `Future` that represents the body of a unit.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type TaskFactory = Box<dyn FnOnce(ProcessShutdown) -> TaskFuture + Send>;

/// Shutdown errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ShutdownError {
    /// The unit did not exit within the allotted time, and was aborted.
    #[snafu(display("Unit '{}' did not exit within {:?} and was aborted.", unit_name, timeout))]
    TimedOut {
        /// Name of the unit.
        unit_name: String,

        /// How long the unit was waited on before being aborted.
        timeout: Duration,
    },

    /// The unit was aborted by another caller before it exited.
    #[snafu(display("Unit '{}' was aborted before it could exit.", unit_name))]
    Aborted {
        /// Name of the unit.
        unit_name: String,
    },

    /// The unit's body panicked.
    #[snafu(display("Unit '{}' panicked.", unit_name))]
    Panicked {
        /// Name of the unit.
        unit_name: String,
    },
}

/// State of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Created, but not yet started.
    Unstarted = 0,

    /// Body is running.
    Running = 1,

    /// Done-signal has fired, but the body has not yet returned.
    StopSignaled = 2,

    /// Body has returned, or will never run.
    Exited = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unstarted,
            1 => Self::Running,
            2 => Self::StopSignaled,
            _ => Self::Exited,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::StopSignaled => "stop_signaled",
            Self::Exited => "exited",
        };
        f.write_str(s)
    }
}

struct Shared {
    state: AtomicU8,
    completed: AtomicBool,
    aborted: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Unstarted as u8),
            completed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn mark_exited(&self, completed: bool) {
        if completed {
            self.completed.store(true, Ordering::Release);
        }
        self.state.store(LifecycleState::Exited as u8, Ordering::Release);
    }
}

/// Marks the unit as exited when the body's future is dropped, however that happens.
///
/// A body that returns normally calls `completed` first. A body that panics or is aborted only runs the drop, which is
/// how the two are told apart afterwards.
struct ExitGuard {
    shared: Arc<Shared>,
    completed: bool,
}

impl ExitGuard {
    fn completed(&mut self) {
        self.completed = true;
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.mark_exited(self.completed);
    }
}

/// A supervised background task.
///
/// `Lifecycle` gives any task body a uniform start / stop / await contract:
///
/// - [`set_task`][Self::set_task] binds the body, which is handed a [`ProcessShutdown`] to observe the done-signal.
/// - [`start`][Self::start] spawns the body at most once, regardless of how many callers race to start it.
/// - [`signal_stop`][Self::signal_stop] fires the done-signal at most once, and never blocks.
/// - [`await_completion`][Self::await_completion] resolves once the body has returned, for every caller.
///
/// Completion is tracked with a [`TaskTracker`]: the body counts as outstanding from just before it is spawned until
/// its future has been dropped.
pub struct Lifecycle {
    identity: UnitIdentity,
    shared: Arc<Shared>,
    task: Mutex<Option<TaskFactory>>,
    shutdown_handle: ShutdownHandle,
    tracker: TaskTracker,
    abort_handle: Mutex<Option<AbortHandle>>,
}

impl Lifecycle {
    /// Creates a new, unstarted `Lifecycle` with the given name.
    ///
    /// The name is sanitized to alphanumerics and underscores.
    ///
    /// # Errors
    ///
    /// If the name is empty after sanitization, an error is returned.
    pub fn new(name: &str) -> Result<Self, ConstructionError> {
        let identity = UnitIdentity::new(name)?;
        let (_, shutdown_handle) = ProcessShutdown::paired();

        Ok(Self {
            identity,
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
            shutdown_handle,
            tracker: TaskTracker::new(),
            abort_handle: Mutex::new(None),
        })
    }

    /// Returns the unit's identifier.
    pub fn id(&self) -> UnitId {
        self.identity.id()
    }

    /// Returns the unit's name.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Returns the current state of the unit.
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Returns `true` if no execution of the body is outstanding.
    ///
    /// This is `true` both before the unit is started and after its body has returned.
    pub fn is_finished(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Binds the body this unit runs.
    ///
    /// Must be called before [`start`][Self::start]. Binding again before starting replaces the previous body, and
    /// binding after the unit has left the unstarted state is ignored.
    pub fn set_task<F, Fut>(&self, task: F)
    where
        F: FnOnce(ProcessShutdown) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.state() != LifecycleState::Unstarted {
            warn!(
                unit_name = self.name(),
                state = %self.state(),
                "Ignoring task bound to unit after it left the unstarted state."
            );
            return;
        }

        let factory: TaskFactory = Box::new(move |process_shutdown| -> TaskFuture { Box::pin(task(process_shutdown)) });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(factory);
    }

    /// Starts the unit.
    ///
    /// Only the first call launches the body: every later or concurrent call is a no-op, as is any call after the unit
    /// was signaled to stop or has exited. Returns `true` if this call launched the body.
    ///
    /// If no body was bound, the unit moves straight to [`LifecycleState::Exited`].
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        // Held until the body is spawned, so that a concurrent `await_completion` cannot observe an empty tracker
        // between the state change and the spawn.
        let _pending = self.tracker.token();

        if !self.shared.transition(LifecycleState::Unstarted, LifecycleState::Running) {
            return false;
        }

        let factory = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(factory) = factory else {
            warn!(unit_name = self.name(), "No task bound to unit. Marking it as exited.");
            self.shared.mark_exited(true);
            return false;
        };

        let body = factory(self.shutdown_handle.subscribe());
        let shared = Arc::clone(&self.shared);
        let handle = self.tracker.spawn(
            async move {
                let mut guard = ExitGuard {
                    shared,
                    completed: false,
                };
                body.await;
                guard.completed();
            }
            .instrument(self.identity.span().clone()),
        );
        *self.abort_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.abort_handle());

        debug!(unit_id = %self.id(), unit_name = self.name(), "Started unit.");
        true
    }

    /// Fires the unit's done-signal.
    ///
    /// Safe to call repeatedly and concurrently, and never waits for the body to observe the signal. Returns `true`
    /// only for the call that actually fired it.
    ///
    /// A unit signaled before it was started moves straight to [`LifecycleState::Exited`] without ever running.
    pub fn signal_stop(&self) -> bool {
        let previous = self.shared.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            match LifecycleState::from_u8(current) {
                LifecycleState::Unstarted | LifecycleState::Running => Some(LifecycleState::StopSignaled as u8),
                _ => None,
            }
        });

        // A unit stopped before it started can never run, so release whatever its body holds onto and settle it as
        // exited right away.
        if previous == Ok(LifecycleState::Unstarted as u8) {
            drop(self.task.lock().unwrap_or_else(PoisonError::into_inner).take());
            self.shared.mark_exited(true);
        }

        let fired = self.shutdown_handle.trigger();
        if fired {
            debug!(unit_id = %self.id(), unit_name = self.name(), "Signaled unit to stop.");
        }
        fired
    }

    /// Waits for the unit's body to return.
    ///
    /// Can be called from any state and by any number of callers, all of which resolve together. Returns immediately if
    /// the unit was never started.
    ///
    /// # Errors
    ///
    /// If the body panicked, or was aborted by a bounded await elsewhere, an error is returned.
    pub async fn await_completion(&self) -> Result<(), ShutdownError> {
        self.tracker.close();
        self.tracker.wait().await;
        self.exit_result()
    }

    /// Waits for the unit's body to return, aborting it if it takes longer than `timeout`.
    ///
    /// An aborted body is dropped at its next suspension point, and this call waits for that to happen before
    /// returning.
    ///
    /// # Errors
    ///
    /// If the timeout expires, [`ShutdownError::TimedOut`] is returned. Otherwise, errors are the same as for
    /// [`await_completion`][Self::await_completion].
    pub async fn await_completion_with_timeout(&self, timeout: Duration) -> Result<(), ShutdownError> {
        match tokio::time::timeout(timeout, self.await_completion()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(unit_id = %self.id(), unit_name = self.name(), ?timeout, "Unit did not exit in time. Aborting.");

                self.shared.aborted.store(true, Ordering::Release);
                if let Some(handle) = self.abort_handle.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                    handle.abort();
                }
                self.tracker.wait().await;

                self.timed_out_result(timeout)
            }
        }
    }

    // The body may have returned between the timeout firing and the abort landing, in which case it was never cut short.
    fn timed_out_result(&self, timeout: Duration) -> Result<(), ShutdownError> {
        if self.shared.completed.load(Ordering::Acquire) {
            return Ok(());
        }

        Err(ShutdownError::TimedOut {
            unit_name: self.name().to_string(),
            timeout,
        })
    }

    fn exit_result(&self) -> Result<(), ShutdownError> {
        if self.state() != LifecycleState::Exited || self.shared.completed.load(Ordering::Acquire) {
            return Ok(());
        }

        let unit_name = self.name().to_string();
        if self.shared.aborted.load(Ordering::Acquire) {
            Err(ShutdownError::Aborted { unit_name })
        } else {
            Err(ShutdownError::Panicked { unit_name })
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::sleep;
    use tokio_test::{assert_pending, assert_ready, task::spawn as test_spawn};

    use super::*;

    fn counting_lifecycle(runs: &Arc<AtomicUsize>) -> Lifecycle {
        let lifecycle = Lifecycle::new("counting").unwrap();
        let runs = Arc::clone(runs);
        lifecycle.set_task(move |mut process_shutdown| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            process_shutdown.wait_for_shutdown().await;
        });
        lifecycle
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_run_body_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(counting_lifecycle(&runs));

        let mut starters = Vec::new();
        for _ in 0..32 {
            let lifecycle = Arc::clone(&lifecycle);
            starters.push(tokio::spawn(async move { lifecycle.start() }));
        }

        let mut launched = 0;
        for starter in starters {
            if starter.await.unwrap() {
                launched += 1;
            }
        }
        assert_eq!(launched, 1);

        lifecycle.signal_stop();
        lifecycle.await_completion().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Inert once exited.
        assert!(!lifecycle.start());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_fire_once() {
        let observed = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(Lifecycle::new("stoppable").unwrap());

        let body_observed = Arc::clone(&observed);
        lifecycle.set_task(move |mut process_shutdown| async move {
            process_shutdown.wait_for_shutdown().await;
            body_observed.fetch_add(1, Ordering::SeqCst);

            // Observing again must not count as a second cancellation event.
            process_shutdown.wait_for_shutdown().await;
        });
        assert!(lifecycle.start());

        let mut stoppers = Vec::new();
        for _ in 0..32 {
            let lifecycle = Arc::clone(&lifecycle);
            stoppers.push(tokio::spawn(async move { lifecycle.signal_stop() }));
        }

        let mut fired = 0;
        for stopper in stoppers {
            if stopper.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        lifecycle.await_completion().await.unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
    }

    #[tokio::test(start_paused = true)]
    async fn await_blocks_until_body_returns() {
        let lifecycle = Lifecycle::new("slow_cleanup").unwrap();
        lifecycle.set_task(|mut process_shutdown| async move {
            process_shutdown.wait_for_shutdown().await;
            sleep(Duration::from_secs(5)).await;
        });
        lifecycle.start();
        tokio::task::yield_now().await;
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        let mut completion = test_spawn(lifecycle.await_completion());
        assert_pending!(completion.poll());

        assert!(lifecycle.signal_stop());
        assert_eq!(lifecycle.state(), LifecycleState::StopSignaled);

        // The body is now inside its cleanup delay.
        sleep(Duration::from_secs(1)).await;
        assert_pending!(completion.poll());
        assert!(!lifecycle.is_finished());

        sleep(Duration::from_secs(5)).await;
        assert!(assert_ready!(completion.poll()).is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        assert!(lifecycle.is_finished());
    }

    #[tokio::test]
    async fn all_awaiters_resolve_together() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(counting_lifecycle(&runs));
        lifecycle.start();

        let mut awaiters = Vec::new();
        for _ in 0..4 {
            let lifecycle = Arc::clone(&lifecycle);
            awaiters.push(tokio::spawn(async move { lifecycle.await_completion().await }));
        }
        tokio::task::yield_now().await;

        lifecycle.signal_stop();
        for awaiter in awaiters {
            assert!(awaiter.await.unwrap().is_ok());
        }

        // Awaiting again after exit returns immediately.
        assert!(assert_ready!(test_spawn(lifecycle.await_completion()).poll()).is_ok());
    }

    #[tokio::test]
    async fn body_can_exit_on_its_own() {
        let lifecycle = Lifecycle::new("one_shot").unwrap();
        lifecycle.set_task(|_| async {});
        lifecycle.start();

        lifecycle.await_completion().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Exited);

        // Signaling an exited unit is harmless and leaves it exited.
        lifecycle.signal_stop();
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
    }

    #[test]
    fn awaiting_unstarted_unit_returns_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = counting_lifecycle(&runs);

        assert!(assert_ready!(test_spawn(lifecycle.await_completion()).poll()).is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Unstarted);
        assert!(lifecycle.is_finished());
    }

    #[tokio::test]
    async fn stop_before_start_prevents_launch() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = counting_lifecycle(&runs);

        assert!(lifecycle.signal_stop());
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        assert!(lifecycle.is_finished());
        assert!(!lifecycle.signal_stop());
        assert!(!lifecycle.start());
        assert_eq!(lifecycle.state(), LifecycleState::Exited);

        lifecycle.await_completion().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_without_task_exits() {
        let lifecycle = Lifecycle::new("empty").unwrap();

        assert!(!lifecycle.start());
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        lifecycle.await_completion().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_await_aborts_stuck_body() {
        let lifecycle = Lifecycle::new("stuck").unwrap();
        lifecycle.set_task(|_| std::future::pending::<()>());
        lifecycle.start();

        lifecycle.signal_stop();
        let result = lifecycle.await_completion_with_timeout(Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(ShutdownError::TimedOut { ref unit_name, timeout })
                if unit_name == "stuck" && timeout == Duration::from_secs(2)
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        assert!(lifecycle.is_finished());

        // Anyone else awaiting learns that the unit did not exit on its own.
        assert!(matches!(
            lifecycle.await_completion().await,
            Err(ShutdownError::Aborted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_await_within_timeout_succeeds() {
        let runs = Arc::new(AtomicUsize::new(0));
        let lifecycle = counting_lifecycle(&runs);
        lifecycle.start();

        lifecycle.signal_stop();
        lifecycle
            .await_completion_with_timeout(Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_await_accepts_body_that_returned_before_abort() {
        let lifecycle = Lifecycle::new("late").unwrap();
        lifecycle.set_task(|_| async {});
        lifecycle.start();
        while !lifecycle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(lifecycle.shared.completed.load(Ordering::Acquire));

        // Keep the tracker busy past the timeout so the abort lands on a body that already returned.
        let busy = lifecycle.tracker.token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            drop(busy);
        });

        lifecycle
            .await_completion_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
        lifecycle.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_body_is_reported() {
        let lifecycle = Lifecycle::new("panicky").unwrap();
        lifecycle.set_task(|_| async { panic!("body failed") });
        lifecycle.start();

        assert!(matches!(
            lifecycle.await_completion().await,
            Err(ShutdownError::Panicked { ref unit_name }) if unit_name == "panicky"
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Exited);
    }

    #[test]
    fn invalid_name_is_rejected() {
        assert!(matches!(
            Lifecycle::new(" "),
            Err(ConstructionError::InvalidName { .. })
        ));
    }
}
