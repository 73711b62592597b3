//! # Worker configuration.
//!
//! Provides [`Config`] centralized settings for the worker runtime.
//!
//! Config is consumed once by [`Worker::new`](crate::Worker::new), which builds the
//! admission gate and the status channel from it and hands the per-job parameters
//! to every [`MirrorJob`](crate::MirrorJob) it spawns.
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → clamped to 1 (a gate with no slots would never admit)
//! - `max_retry = 0` → clamped to 1 (every run makes at least one attempt)
//! - `status_capacity = 0`, `command_capacity = 0` → clamped to 1

use std::time::Duration;

/// Global configuration for the worker runtime.
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of jobs allowed to run their sync body concurrently.
    ///
    /// Jobs admitted through a force-start bypass do not count against it.
    pub max_concurrent: usize,

    /// Number of provider attempts per run before giving up.
    pub max_retry: usize,

    /// Pause after a `restart` tear-down before the next run starts.
    ///
    /// Gives an external process that was just killed time to release its resources.
    pub restart_delay: Duration,

    /// Grace period between SIGTERM and SIGKILL when terminating a process.
    pub terminate_grace: Duration,

    /// Timeout handed to the container runtime's `stop` command.
    pub container_stop_timeout: Duration,

    /// Buffer of the manager-status channel.
    ///
    /// Jobs block on a full channel, so this should comfortably exceed the
    /// number of messages all jobs can emit while the manager is busy.
    pub status_capacity: usize,

    /// Buffer of each job's command channel.
    pub command_capacity: usize,

    /// Maximum wait for all jobs to exit after `halt`.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Returns the admission capacity, clamped to a minimum of 1.
    #[inline]
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent.max(1)
    }

    /// Returns the attempts per run, clamped to a minimum of 1.
    #[inline]
    pub fn attempts(&self) -> usize {
        self.max_retry.max(1)
    }

    /// Returns the status channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn status_capacity_clamped(&self) -> usize {
        self.status_capacity.max(1)
    }

    /// Returns the command channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn command_capacity_clamped(&self) -> usize {
        self.command_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_concurrent = 10`
    /// - `max_retry = 2`
    /// - `restart_delay = 1s`
    /// - `terminate_grace = 2s`
    /// - `container_stop_timeout = 2s`
    /// - `status_capacity = 1024`
    /// - `command_capacity = 1`
    /// - `shutdown_grace = 60s`
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_retry: 2,
            restart_delay: Duration::from_secs(1),
            terminate_grace: Duration::from_secs(2),
            container_stop_timeout: Duration::from_secs(2),
            status_capacity: 1024,
            command_capacity: 1,
            shutdown_grace: Duration::from_secs(60),
        }
    }
}
