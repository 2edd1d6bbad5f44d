//! Single-flight coordination of token refreshes
//!
//! The first request to hit an authorization failure becomes the leader and
//! performs the refresh. Requests that fail while the leader is refreshing are
//! queued as oneshot senders and resumed, in the order they were queued, with
//! the leader's result.
//!
//! The in-flight flag and the queue sit behind one `std::sync::Mutex`. Two
//! critical sections exist: check-flag/enqueue/set-flag in `join`, and
//! clear-flag/take-queue in `settle`. The lock is never held across an await
//! and waiters are notified after it is released.
//!
//! The leader holds a `LeaderGuard`. If the leader's future is dropped before
//! settling (cancelled task, panic), the guard settles with no token so queued
//! requests are never stranded.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Token handed to a resumed request. `None` means the refresh failed.
pub type RefreshOutcome = Option<String>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    pending: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Owner of the refresh-in-flight flag and the pending request queue.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// What a request that saw an authorization failure must do next.
pub enum Ticket<'a> {
    /// Perform the refresh, then settle the guard
    Leader(LeaderGuard<'a>),
    /// Wait for the leader's outcome
    Follower(oneshot::Receiver<RefreshOutcome>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader if no refresh is running, otherwise queue up.
    pub fn join(&self) -> Ticket<'_> {
        let mut state = self.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.pending.push_back(tx);
            debug!(position = state.pending.len(), "refresh in flight, request queued");
            Ticket::Follower(rx)
        } else {
            state.in_flight = true;
            debug!("starting token refresh");
            Ticket::Leader(LeaderGuard {
                coordinator: self,
                settled: false,
            })
        }
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of requests waiting on the running refresh.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Clear the flag and resume every queued request in FIFO order.
    /// Returns how many were queued.
    fn settle(&self, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.pending)
        };
        let count = waiters.len();
        for waiter in waiters {
            // A closed receiver means that caller went away; nothing to resume
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of leadership. Must be settled exactly once; dropping it unsettled
/// releases the queue with no token.
pub struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    /// Publish the refresh outcome. Returns how many queued requests resumed.
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released = self.coordinator.settle(None);
            warn!(released, "token refresh abandoned, releasing queued requests");
        }
    }
}
