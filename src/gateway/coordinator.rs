// Single-flight refresh coordination
//
// The first caller to observe an expired session becomes the leader and
// performs the refresh. Callers arriving while the leader is in flight are
// queued and resumed with the leader's outcome. Callers whose 401 lands
// after a refresh already settled reuse that outcome instead of refreshing
// again.

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct CoordinatorState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<Option<String>>>,
    /// Bumped every time a refresh settles
    generation: u64,
    /// Outcome of the last settled refresh
    last_outcome: Option<String>,
}

/// Refresh lock plus waiter queue, owned by one gateway
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
}

/// Role assigned to a caller that needs a fresh token
pub enum Ticket<'a> {
    /// Caller must perform the refresh and settle the lease
    Leader(RefreshLease<'a>),
    /// A refresh is already in flight; await its outcome
    Waiter(RefreshWaiter),
    /// A refresh settled after the caller's attempt was sent: retry with the
    /// new token, or fail with `None`
    Settled(Option<String>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh generation; snapshot it before reading the token an attempt sends
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Take the leader role if idle, otherwise join the waiter queue.
    /// `seen` is the generation snapshotted before the attempt was sent and
    /// `sent_token` the token it carried.
    /// Check-and-set happens under one lock with no await in between.
    pub fn join(&self, seen: u64, sent_token: Option<&str>) -> Ticket<'_> {
        let mut state = self.state.lock();
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            tracing::debug!(waiters = state.waiters.len(), "Refresh in flight, queued");
            Ticket::Waiter(RefreshWaiter { rx })
        } else if state.generation != seen && state.last_outcome.as_deref() != sent_token {
            tracing::debug!(
                generation = state.generation,
                seen,
                "Refresh settled after request was sent, reusing outcome"
            );
            Ticket::Settled(state.last_outcome.clone())
        } else {
            state.refreshing = true;
            Ticket::Leader(RefreshLease {
                coordinator: self,
                settled: false,
            })
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    /// Number of callers currently waiting on the in-flight refresh
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn settle(&self, token: Option<&str>) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            state.generation += 1;
            state.last_outcome = token.map(str::to_string);
            std::mem::take(&mut state.waiters)
        };

        let count = waiters.len();
        for waiter in waiters {
            // Receiver gone means the waiting request was dropped
            let _ = waiter.send(token.map(str::to_string));
        }
        count
    }
}

/// Leader's obligation to settle the refresh.
/// Dropping an unsettled lease rejects all waiters.
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Resume every waiter with the new access token
    pub fn resolve(mut self, access_token: &str) -> usize {
        self.settled = true;
        let resumed = self.coordinator.settle(Some(access_token));
        tracing::info!(waiters = resumed, "Refresh succeeded, resumed waiting requests");
        resumed
    }

    /// Release every waiter without a token
    pub fn reject(mut self) -> usize {
        self.settled = true;
        let rejected = self.coordinator.settle(None);
        tracing::warn!(waiters = rejected, "Refresh failed, rejected waiting requests");
        rejected
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refresh abandoned before settling");
            self.coordinator.settle(None);
        }
    }
}

/// Queued caller awaiting the leader's outcome
pub struct RefreshWaiter {
    rx: oneshot::Receiver<Option<String>>,
}

impl RefreshWaiter {
    /// New access token, or `None` if the refresh failed
    pub async fn wait(self) -> Option<String> {
        self.rx.await.ok().flatten()
    }
}
