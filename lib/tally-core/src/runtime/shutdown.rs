use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

/// The receiving side of a unit's done-signal.
///
/// Any number of `ProcessShutdown` values can observe the same signal. Each observes it exactly once: after
/// [`wait_for_shutdown`][Self::wait_for_shutdown] has resolved, later calls on the same value return immediately.
pub struct ProcessShutdown {
    token: CancellationToken,
    observed: bool,
}

/// The sending side of a unit's done-signal.
///
/// Triggering is idempotent: only the first call to [`trigger`][Self::trigger] fires the signal, and every later or
/// concurrent call is a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ProcessShutdown {
    /// Creates a new `ProcessShutdown` and `ShutdownHandle` pair.
    pub fn paired() -> (Self, ShutdownHandle) {
        let handle = ShutdownHandle::new();
        (handle.subscribe(), handle)
    }

    /// Waits for the done-signal to fire.
    ///
    /// This is cancel-safe, and can be used as a branch of `select!` inside a loop.
    pub async fn wait_for_shutdown(&mut self) {
        if self.observed {
            return;
        }

        self.token.cancelled().await;
        self.observed = true;
    }
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a new receiver for this done-signal.
    ///
    /// Receivers created after the signal has fired resolve immediately.
    pub fn subscribe(&self) -> ProcessShutdown {
        ProcessShutdown {
            token: self.token.clone(),
            observed: false,
        }
    }

    /// Fires the done-signal.
    ///
    /// Returns `true` if this call fired the signal, or `false` if it had already been fired.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.token.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task::spawn as test_spawn};

    use super::*;

    #[test]
    fn pending_until_triggered() {
        let (mut process_shutdown, handle) = ProcessShutdown::paired();

        let mut wait = test_spawn(process_shutdown.wait_for_shutdown());
        assert_pending!(wait.poll());

        assert!(handle.trigger());
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn only_first_trigger_fires() {
        let (mut process_shutdown, handle) = ProcessShutdown::paired();
        assert_pending!(test_spawn(process_shutdown.wait_for_shutdown()).poll());

        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert!(!handle.clone().trigger());
        assert_ready!(test_spawn(process_shutdown.wait_for_shutdown()).poll());
    }

    #[test]
    fn every_subscriber_observes_the_signal() {
        let (mut first, handle) = ProcessShutdown::paired();
        let mut second = handle.subscribe();

        handle.trigger();

        // Subscribed after the fact, but must still resolve.
        let mut late = handle.subscribe();

        assert_ready!(test_spawn(first.wait_for_shutdown()).poll());
        assert_ready!(test_spawn(second.wait_for_shutdown()).poll());
        assert_ready!(test_spawn(late.wait_for_shutdown()).poll());

        // Repeated waits on an observed signal return immediately.
        assert_ready!(test_spawn(first.wait_for_shutdown()).poll());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_triggers_fire_exactly_once() {
        let (mut process_shutdown, handle) = ProcessShutdown::paired();

        let mut triggers = Vec::new();
        for _ in 0..16 {
            let handle = handle.clone();
            triggers.push(tokio::spawn(async move { handle.trigger() }));
        }

        let mut fired = 0;
        for trigger in triggers {
            if trigger.await.unwrap() {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        tokio::time::timeout(Duration::from_secs(1), process_shutdown.wait_for_shutdown())
            .await
            .unwrap();
    }
}
