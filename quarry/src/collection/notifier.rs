use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct NotifierState {
    version: u64,
    dead: bool,
}

/// Wakes readers tailing a capped collection when new documents commit.
///
/// Every notification bumps a version. A waiter passes the version it last
/// saw and returns once the version moved, the notifier died or the timeout
/// passed. Wake-ups are best effort; waiters re-check their own condition.
pub struct CappedInsertNotifier {
    state: Mutex<NotifierState>,
    cond: Condvar,
}

impl CappedInsertNotifier {
    pub fn new() -> Self {
        CappedInsertNotifier {
            state: Mutex::new(NotifierState {
                version: 0,
                dead: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn notify_all(&self) {
        let mut state = self.state.lock();
        state.version += 1;
        self.cond.notify_all();
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Blocks until the version differs from `prev_version`, the notifier is
    /// killed or `timeout` elapses. Sleeps at most `granularity` at a time.
    /// Returns the current version.
    pub fn wait_for_insert(&self, prev_version: u64, timeout: Duration, granularity: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.version == prev_version && !state.dead {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wake_at = deadline.min(now + granularity);
            let _ = self.cond.wait_until(&mut state, wake_at);
        }
        state.version
    }

    /// Wakes every waiter for good.
    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.dead = true;
        self.cond.notify_all();
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }
}

impl Default for CappedInsertNotifier {
    fn default() -> Self {
        Self::new()
    }
}
