//! Named, cancellable one-shot timers
//!
//! Each connection owns a fixed set of timer roles. Arming a role always
//! cancels the previous instance of that role first, so at most one timer
//! per role is live at any time; everything is cancelled on teardown.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Timer roles a stream connection can arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerRole {
    /// Backoff delay before the next rebuild
    Reconnect,
    /// Deadline for ICE to reach a connected state
    IceDeadline,
    /// Window in which an ICE disconnect may recover on its own
    DisconnectGrace,
    /// Sustained-poor-quality window before fallback
    QualityGrace,
}

/// One-shot timer table keyed by role
pub(crate) struct TimerSet {
    slots: Mutex<HashMap<TimerRole, JoinHandle<()>>>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Arm `role` to run `action` after `delay`, cancelling any previous
    /// timer of the same role
    pub(crate) fn arm<F>(&self, role: TimerRole, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        if let Some(previous) = self.slots.lock().insert(role, handle) {
            previous.abort();
        }
    }

    /// Cancel a role's timer if armed; returns whether one was live
    pub(crate) fn cancel(&self, role: TimerRole) -> bool {
        match self.slots.lock().remove(&role) {
            Some(handle) => {
                let was_live = !handle.is_finished();
                handle.abort();
                was_live
            }
            None => false,
        }
    }

    /// Cancel every armed timer
    pub(crate) fn cancel_all(&self) {
        for (_, handle) in self.slots.lock().drain() {
            handle.abort();
        }
    }

    /// Whether a role currently has a live timer (test hook)
    #[cfg(test)]
    pub(crate) fn is_armed(&self, role: TimerRole) -> bool {
        self.slots
            .lock()
            .get(&role)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
