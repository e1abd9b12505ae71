//! Sleep/wakeup channels.

use parking_lot::{Condvar, MutexGuard};

/// A channel a thread sleeps on while it waits for a predicate over
/// state protected by a `parking_lot::Mutex`.
///
/// Several channels may be bound to the same mutex, one per predicate,
/// so a wakeup only disturbs the threads whose predicate may have
/// changed.
pub struct WaitChannel {
    cond: Condvar,
}

impl WaitChannel {
    pub const fn new() -> WaitChannel {
        WaitChannel { cond: Condvar::new() }
    }

    /// Atomically releases the guard's mutex and sleeps on this channel.
    /// Reacquires the mutex when awakened.
    ///
    /// Wakeups may be spurious; callers must re-check their predicate in
    /// a loop.
    pub fn sleep<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.cond.wait(guard);
    }

    /// Wakes every thread sleeping on this channel.
    pub fn wakeup(&self) {
        let _ = self.cond.notify_all();
    }
}

impl Default for WaitChannel {
    fn default() -> WaitChannel {
        WaitChannel::new()
    }
}
