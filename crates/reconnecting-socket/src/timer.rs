//! Timer service used for connect timeouts and backoff delays.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Creates a token from a raw id. Timer implementations hand these out.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Schedules one-shot callbacks.
///
/// Expiry is reported back to the socket through
/// [`ReconnectingSocket::handle_timer`](crate::ReconnectingSocket::handle_timer).
/// A cancelled token that still gets reported is ignored by the socket.
pub trait Timer: Send {
    /// Schedules a one-shot timer firing after `delay`.
    fn schedule(&mut self, delay: Duration) -> TimerToken;

    /// Cancels a pending timer. Unknown or already fired tokens are ignored.
    fn cancel(&mut self, token: TimerToken);
}

/// Called with the token of every timer that fires.
pub type TimerCallback = Arc<dyn Fn(TimerToken) + Send + Sync>;

/// [`Timer`] backed by `tokio::time::sleep`.
///
/// Every scheduled timer is a small task; cancelling aborts it. Must be used
/// from within a tokio runtime.
pub struct TokioTimer {
    on_fire: TimerCallback,
    pending: HashMap<TimerToken, AbortHandle>,
    next_id: u64,
}

impl TokioTimer {
    /// Creates a timer that reports expiries to `on_fire`.
    pub fn new(on_fire: TimerCallback) -> Self {
        Self {
            on_fire,
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Returns the number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.pending
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration) -> TimerToken {
        self.pending.retain(|_, handle| !handle.is_finished());

        let token = TimerToken::new(self.next_id);
        self.next_id += 1;

        let on_fire = Arc::clone(&self.on_fire);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token);
        });
        self.pending.insert(token, task.abort_handle());
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(handle) = self.pending.remove(&token) {
            handle.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

impl fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTimer")
            .field("pending", &self.pending())
            .finish()
    }
}
