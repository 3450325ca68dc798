//! Process-wide "fork in progress" flag.
//!
//! Fork and kill claim the barrier for their whole duration. Lighter
//! mutations only wait for it to clear. Waiting parks the task on a
//! [`Notify`] so the event loop keeps servicing other work.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ForkBarrier {
    in_progress: AtomicBool,
    released: Notify,
}

/// Holds the barrier; releases it on drop.
#[derive(Debug)]
pub struct BarrierGuard<'a> {
    barrier: &'a ForkBarrier,
}

impl ForkBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Wait until the barrier is clear, then claim it.
    pub async fn enter(&self) -> BarrierGuard<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not lost.
            released.as_mut().enable();

            if self
                .in_progress
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return BarrierGuard { barrier: self };
            }
            released.await;
        }
    }

    /// Wait until no fork or kill is in progress, without claiming.
    pub async fn wait_clear(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if !self.is_set() {
                return;
            }
            released.await;
        }
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.barrier.in_progress.store(false, Ordering::Release);
        self.barrier.released.notify_waiters();
    }
}
