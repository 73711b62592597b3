//! # Global admission gate.
//!
//! Bounds how many jobs may run their sync body at the same time.
//!
//! ```text
//!                       ┌─────────────────────────────┐
//!   job ── admit() ───► │ select (first ready wins):  │
//!                       │  ├─ semaphore permit  ──────┼──► Admitted::Slot (released on drop)
//!                       │  ├─ bypass slot taken ──────┼──► Admitted::Bypassed
//!                       │  └─ kill cancelled    ──────┼──► None (body never runs)
//!                       └─────────────────────────────┘
//! ```
//!
//! ## Rules
//! - At most `capacity` jobs hold a [`Admitted::Slot`] at once.
//! - A bypass is requested per job through its [`BypassSlot`]; a request made while
//!   one is already pending is dropped, never queued.
//! - The gate is constructed once by the worker and shared by reference.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counting gate shared by every job of a worker.
#[derive(Debug)]
pub struct Admission {
    slots: Arc<Semaphore>,
}

/// Proof of admission, held for the duration of the sync body.
#[derive(Debug)]
pub enum Admitted {
    /// A normal slot; released when dropped.
    Slot(OwnedSemaphorePermit),
    /// Admitted without consuming a slot.
    Bypassed,
}

impl Admission {
    /// Creates a gate with `capacity` slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for admission on behalf of `job`.
    ///
    /// Returns `None` if `kill` fires first (or the gate was closed); the caller
    /// must then skip the sync body entirely.
    pub async fn admit(
        &self,
        job: &str,
        bypass: &BypassSlot,
        kill: &CancellationToken,
    ) -> Option<Admitted> {
        tokio::select! {
            permit = self.slots.clone().acquire_owned() => permit.ok().map(Admitted::Slot),
            _ = bypass.take() => {
                info!(job, "concurrent limit ignored by {job}");
                Some(Admitted::Bypassed)
            }
            _ = kill.cancelled() => None,
        }
    }
}

/// Single-slot "skip the limit" request of one job.
#[derive(Debug, Default)]
pub struct BypassSlot {
    requested: AtomicBool,
    notify: Notify,
}

impl BypassSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a bypass without blocking.
    ///
    /// Returns `false` (and changes nothing) if a request is already pending.
    pub fn try_set(&self) -> bool {
        let set = self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if set {
            self.notify.notify_one();
        }
        set
    }

    /// Returns true if a request is pending.
    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Waits for a request and consumes it.
    pub async fn take(&self) {
        loop {
            let notified = self.notify.notified();
            if self.requested.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}
