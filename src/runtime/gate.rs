//! Step gate
//!
//! Synchronisation between the run loop and its controllers. Controllers only
//! adjust the step budget and wait on the status signal; the run loop is the
//! only writer of the status. The budget is `-1` for an unbounded run, `0`
//! when exhausted, and otherwise the number of interactions still allowed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

/// Budget value meaning "no limit".
pub const UNBOUNDED: i64 = -1;

/// Run-loop status published to controllers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStatus {
    /// An interaction is being dispatched; stopping now would race it.
    pub in_flight: bool,
    /// The loop is in a run that has not yet observed an exhausted budget.
    pub running: bool,
}

impl GateStatus {
    /// No interaction in flight and no run in progress.
    pub fn is_safe(&self) -> bool {
        !self.in_flight && !self.running
    }
}

/// Budget counter plus the cancellation and safety signals.
#[derive(Debug)]
pub struct StepGate {
    budget: AtomicI64,
    shutdown: CancellationToken,
    status: watch::Sender<GateStatus>,
    wake: Notify,
}

impl Default for StepGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StepGate {
    /// Exhausted gate with no interaction in flight.
    pub fn new() -> Self {
        let (status, _) = watch::channel(GateStatus::default());
        Self {
            budget: AtomicI64::new(0),
            shutdown: CancellationToken::new(),
            status,
            wake: Notify::new(),
        }
    }

    /// Replace the budget and wake an idle loop.
    pub fn set_budget(&self, budget: i64) {
        // swap rather than store so a controller synchronises with the loop's last take
        self.budget.swap(budget.max(UNBOUNDED), Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Remaining budget; `None` when unbounded.
    pub fn remaining(&self) -> Option<u64> {
        match self.budget.load(Ordering::SeqCst) {
            UNBOUNDED => None,
            n => Some(n.max(0) as u64),
        }
    }

    /// Whether no further interaction may start.
    pub fn is_exhausted(&self) -> bool {
        self.budget.load(Ordering::SeqCst) == 0
    }

    /// Consume one step if the budget allows.
    pub fn try_take(&self) -> bool {
        let mut current = self.budget.load(Ordering::SeqCst);
        loop {
            let next = match current {
                0 => return false,
                UNBOUNDED => return true,
                n => n - 1,
            };
            match self.budget.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Publish a status change.
    pub fn update(&self, change: impl FnOnce(&mut GateStatus)) {
        self.status.send_if_modified(|status| {
            let before = *status;
            change(status);
            *status != before
        });
    }

    /// Current status.
    pub fn status(&self) -> GateStatus {
        *self.status.borrow()
    }

    /// Wait until the loop reports no interaction in flight and no run in progress.
    pub async fn wait_safe(&self) {
        let mut rx = self.status.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(GateStatus::is_safe).await;
    }

    /// Wait until the budget is exhausted and the loop is safe, or shutdown.
    pub async fn wait_idle(&self, poll: Duration) {
        let mut rx = self.status.subscribe();
        loop {
            if self.is_cancelled() || (self.is_exhausted() && rx.borrow_and_update().is_safe()) {
                return;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = rx.changed() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Idle wait of the run loop: returns on shutdown, on a budget change, or after `poll`.
    pub async fn idle(&self, poll: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }

    /// Request loop termination.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.wake.notify_one();
    }

    /// Whether termination was requested.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Child token for one plugin call; cancelled on shutdown.
    pub fn call_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bounded_budget_counts_down_to_exhaustion() {
        let gate = StepGate::new();
        assert!(!gate.try_take());

        gate.set_budget(2);
        assert!(gate.try_take());
        assert_eq!(gate.remaining(), Some(1));
        assert!(gate.try_take());
        assert!(gate.is_exhausted());
        assert!(!gate.try_take());
    }

    #[test]
    fn test_unbounded_budget_never_exhausts() {
        let gate = StepGate::new();
        gate.set_budget(UNBOUNDED);
        for _ in 0..100 {
            assert!(gate.try_take());
        }
        assert_eq!(gate.remaining(), None);

        gate.set_budget(0);
        assert!(!gate.try_take());
    }

    #[test]
    fn test_concurrent_takes_never_exceed_budget() {
        let gate = Arc::new(StepGate::new());
        gate.set_budget(1000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || (0..500).filter(|_| gate.try_take()).count())
            })
            .collect();
        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(taken, 1000);
        assert!(gate.is_exhausted());
    }

    #[tokio::test]
    async fn test_wait_safe_blocks_until_loop_reports_safe() {
        let gate = Arc::new(StepGate::new());
        gate.update(|s| {
            s.in_flight = true;
            s.running = true;
        });

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_safe().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.update(|s| *s = GateStatus::default());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_wakes_on_budget_change() {
        let gate = Arc::new(StepGate::new());
        let sleeper = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.idle(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.set_budget(1);
        tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
    }
}
