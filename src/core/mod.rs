//! Runtime core: job control and process lifecycle.
//!
//! The public API from this module is [`Worker`], [`MirrorJob`] and the
//! primitives they are built from.
//!
//! Internal modules:
//! - [`runner`]: one external process per attempt, with graceful-then-forceful termination;
//! - [`admission`]: global concurrency gate with a per-job bypass slot;
//! - [`state`]: atomically stored job state;
//! - [`action`]: control actions sent by the manager;
//! - [`job`]: the per-mirror controller loop and its run task;
//! - [`worker`]: owns all jobs, the shared gate and the shutdown wait group;
//! - [`shutdown`]: OS shutdown signal handling.

mod action;
mod admission;
mod job;
mod runner;
mod shutdown;
mod state;
mod worker;

pub use action::CtrlAction;
pub use admission::{Admission, Admitted, BypassSlot};
pub use job::{JobContext, JobHandle, JobParams, MirrorJob};
pub use runner::{CmdJob, CmdSpec, build_environ};
pub use state::{AtomicState, JobState};
pub use worker::Worker;
