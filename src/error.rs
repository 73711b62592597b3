//! Error types used by the job runtime, providers and the process runner.
//!
//! This module defines four error enums:
//!
//! - [`RunnerError`]: failures of one external process (launch, wait, termination).
//! - [`SyncError`]: failures reported by a provider's `run`/`terminate` or by a hook.
//! - [`JobError`]: failures of the job controller itself.
//! - [`WorkerError`]: failures of the worker that owns all jobs.
//!
//! Every type provides `as_label` (stable snake_case label for logs).
//! [`RunnerError`] and [`SyncError`] are `Clone` so a cached terminal result can
//! be handed to every concurrent waiter.

use std::time::Duration;

use thiserror::Error;

use crate::core::JobState;
use crate::provider::HookPhase;

/// # Errors produced by the process runner.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// `terminate`/`wait` was called before `start`.
    #[error("process not started")]
    ProcessNotStarted,

    /// The configured command line has no program.
    #[error("empty command line")]
    EmptyCommand,

    /// `start` was called twice on the same job.
    #[error("process already started")]
    AlreadyStarted,

    /// The executable could not be started.
    #[error("failed to launch {program}: {error}")]
    Launch {
        /// Program that failed to launch.
        program: String,
        /// The underlying error message.
        error: String,
    },

    /// Waiting on the process failed at the OS level.
    #[error("failed to wait on process: {error}")]
    Wait {
        /// The underlying error message.
        error: String,
    },

    /// The process exited unsuccessfully.
    #[error("process exited with {status}")]
    Exited {
        /// Rendered exit status (code or signal).
        status: String,
    },

    /// Sending a signal to the process group failed.
    #[error("failed to send {signal} to process group: {error}")]
    Signal {
        /// Signal name.
        signal: &'static str,
        /// The underlying error message.
        error: String,
    },

    /// SIGTERM did not stop the process within the grace period; SIGKILL was sent.
    #[error("graceful termination failed after {grace:?}; process killed")]
    GracefulTimeout {
        /// The grace period that elapsed.
        grace: Duration,
    },

    /// The container runtime could not be asked to stop the container.
    #[error("failed to stop container {container}: {error}")]
    ContainerStop {
        /// Container name.
        container: String,
        /// The underlying error message.
        error: String,
    },
}

impl RunnerError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use syncvisor::RunnerError;
    ///
    /// assert_eq!(RunnerError::ProcessNotStarted.as_label(), "runner_not_started");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RunnerError::ProcessNotStarted => "runner_not_started",
            RunnerError::EmptyCommand => "runner_empty_command",
            RunnerError::AlreadyStarted => "runner_already_started",
            RunnerError::Launch { .. } => "runner_launch",
            RunnerError::Wait { .. } => "runner_wait",
            RunnerError::Exited { .. } => "runner_exited",
            RunnerError::Signal { .. } => "runner_signal",
            RunnerError::GracefulTimeout { .. } => "runner_graceful_timeout",
            RunnerError::ContainerStop { .. } => "runner_container_stop",
        }
    }
}

/// # Errors produced by a sync attempt.
///
/// Returned by [`Provider::run`](crate::Provider::run),
/// [`Provider::terminate`](crate::Provider::terminate) and every [`Hook`](crate::Hook) method.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The attempt failed and may succeed if retried.
    #[error("{error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The attempt was aborted by a control action.
    #[error("killed by manager")]
    Killed,

    /// The external process failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl SyncError {
    /// Shorthand for [`SyncError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        SyncError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SyncError::Fail { .. } => "sync_failed",
            SyncError::Killed => "sync_killed",
            SyncError::Runner(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the job controller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The requested operation is not allowed in the current state.
    #[error("provider cannot be switched when job state is {state}")]
    InvalidState {
        /// State observed when the request was rejected.
        state: JobState,
    },

    /// The controller loop is already running for this job.
    #[error("job controller already running")]
    AlreadyRunning,

    /// A lifecycle hook failed; the whole run was aborted.
    #[error("error exec hook {phase}: {error}")]
    Hook {
        /// Phase that failed.
        phase: HookPhase,
        /// The hook's error.
        error: SyncError,
    },

    /// The provider could not be terminated after a kill request.
    #[error("failed to terminate provider {job}: {error}")]
    Terminate {
        /// Job name.
        job: String,
        /// The provider's error.
        error: SyncError,
    },
}

impl JobError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::InvalidState { .. } => "job_invalid_state",
            JobError::AlreadyRunning => "job_already_running",
            JobError::Hook { .. } => "job_hook_failed",
            JobError::Terminate { .. } => "job_terminate_failed",
        }
    }
}

/// # Errors produced by the worker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// A job with the same name is already registered.
    #[error("job {name} already exists")]
    DuplicateJob {
        /// Job name.
        name: String,
    },

    /// No job with this name is registered.
    #[error("job {name} not found")]
    UnknownJob {
        /// Job name.
        name: String,
    },

    /// The job's command channel is full.
    #[error("job {name} command channel is full")]
    Busy {
        /// Job name.
        name: String,
    },

    /// The job's command channel is closed (its controller has returned).
    #[error("job {name} is no longer accepting commands")]
    Closed {
        /// Job name.
        name: String,
    },

    /// Jobs did not exit within the shutdown grace period.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Jobs whose controllers were still running.
        stuck: Vec<String>,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::DuplicateJob { .. } => "worker_duplicate_job",
            WorkerError::UnknownJob { .. } => "worker_unknown_job",
            WorkerError::Busy { .. } => "worker_job_busy",
            WorkerError::Closed { .. } => "worker_job_closed",
            WorkerError::GraceExceeded { .. } => "worker_grace_exceeded",
        }
    }
}
