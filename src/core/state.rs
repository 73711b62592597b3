//! # Job lifecycle state.
//!
//! ```text
//!            start/restart/force-start
//!   none ───────────────────────────────► ready ◄──────┐
//!    │                                     │  │        │ start/restart
//!    │ stop                           stop │  │        │
//!    ▼                                     ▼  │     paused
//!  paused ◄────────────────────────────────┘  │
//!                                             │
//!   any ── disable ──► disabled (controller returns; a new run may restart it)
//!   any ── halt    ──► halting  (absorbing)
//! ```
//!
//! The state is written only by the job's controller loop and read from anywhere
//! through [`AtomicState`].

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::warn;

/// Lifecycle state of a [`MirrorJob`](crate::MirrorJob).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    /// Initial state, nothing requested yet.
    #[default]
    None = 0,
    /// Eligible to run.
    Ready = 1,
    /// Stopped, resumable.
    Paused = 2,
    /// Disabled; the controller has returned.
    Disabled = 3,
    /// The worker is shutting down.
    Halting = 4,
}

impl JobState {
    /// Returns the state name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::None => "none",
            JobState::Ready => "ready",
            JobState::Paused => "paused",
            JobState::Disabled => "disabled",
            JobState::Halting => "halting",
        }
    }

    /// States in which the controller loop is no longer running.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Disabled | JobState::Halting)
    }

    /// `halting` is absorbing; every other transition is legal.
    #[inline]
    pub fn can_transition_to(&self, next: JobState) -> bool {
        *self != JobState::Halting || next == JobState::Halting
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => JobState::Ready,
            2 => JobState::Paused,
            3 => JobState::Disabled,
            4 => JobState::Halting,
            _ => JobState::None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically stored [`JobState`].
#[derive(Debug, Default)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    /// Creates a cell holding `state`.
    pub fn new(state: JobState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Reads the current state.
    #[inline]
    pub fn load(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` if the transition is legal; returns whether it was applied.
    pub fn store(&self, next: JobState) -> bool {
        let prev = self.load();
        if !prev.can_transition_to(next) {
            warn!(from = %prev, to = %next, "illegal job state transition ignored");
            return false;
        }
        self.0.store(next as u8, Ordering::Release);
        true
    }
}
