//! # Status events emitted by jobs.
//!
//! [`JobMessage`] is the only thing a job ever tells the manager. Messages of one
//! job are sent in program order over a single channel; there is no ordering
//! between different jobs.

use serde::{Deserialize, Serialize};

use super::status::SyncStatus;

/// Immutable status event produced by a [`MirrorJob`](crate::MirrorJob).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Reported status.
    pub status: SyncStatus,
    /// Name of the job (provider name).
    pub name: String,
    /// Free-text detail, empty unless the status carries an error.
    pub msg: String,
    /// The manager may re-queue this job on its own cadence.
    pub schedule: bool,
}

impl JobMessage {
    /// Creates a message with an empty detail and `schedule = false`.
    pub fn new(status: SyncStatus, name: impl Into<String>) -> Self {
        Self {
            status,
            name: name.into(),
            msg: String::new(),
            schedule: false,
        }
    }

    /// Attaches a free-text detail.
    #[inline]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    /// Marks the message as schedule-eligible.
    #[inline]
    pub fn with_schedule(mut self, schedule: bool) -> Self {
        self.schedule = schedule;
        self
    }
}
