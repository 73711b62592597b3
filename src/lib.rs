//! # syncvisor
//!
//! **Syncvisor** is the worker-side job control core of a mirror syncing system.
//!
//! Each mirror is a [`MirrorJob`] driven by control actions ([`CtrlAction`]) from a
//! manager. A job runs its [`Provider`] through lifecycle hooks, retries failed
//! attempts, respects a global concurrency limit and reports every status change
//! on a single [`JobMessage`] channel.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Provider   │   │   Provider   │   │   Provider   │
//!     │ (mirror #1)  │   │ (mirror #2)  │   │ (mirror #3)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Worker                                                           │
//! │  - Admission (max_concurrent slots + per-job bypass)              │
//! │  - StatusSink (mpsc sender of JobMessage)                         │
//! │  - TaskTracker (wait group for controllers and run tasks)         │
//! │  - registry: name → (MirrorJob, JobHandle)                        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  MirrorJob   │   │  MirrorJob   │   │  MirrorJob   │
//!     │ (controller) │   │ (controller) │   │ (controller) │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │ pre-syncing      │ syncing          │ failed / success
//!      ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                Receiver<JobMessage> (manager side)                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Run lifecycle
//! ```text
//! start ──► state = ready ──► spawn run task
//!
//! run task {
//!   ├─► admit (slot | force-start bypass | killed → exit silently)
//!   ├─► publish PreSyncing, hooks: pre-job
//!   └─► for retry in 0..max_retry {
//!         ├─► hooks: pre-exec, publish Syncing
//!         ├─► provider.run()   (terminate() on stop/disable/restart/halt)
//!         ├─► hooks: post-exec (reverse order)
//!         ├─ Ok  ──► publish Success, hooks: post-success, exit
//!         └─ Err ──► publish Failed, hooks: post-fail, exit if killed
//!       }
//! }
//! ```
//!
//! ## Features
//! | Area           | Description                                              | Key types / traits                  |
//! |----------------|----------------------------------------------------------|-------------------------------------|
//! | **Jobs**       | Per-mirror controller reacting to manager actions.       | [`MirrorJob`], [`CtrlAction`]       |
//! | **Providers**  | Pluggable sync backends and lifecycle hooks.             | [`Provider`], [`Hook`]              |
//! | **Processes**  | External command runner with graceful termination.       | [`CmdJob`], [`CmdProvider`]         |
//! | **Admission**  | Global concurrency gate with force-start bypass.         | [`Admission`], [`BypassSlot`]       |
//! | **Status**     | Messages reported to the manager.                        | [`JobMessage`], [`SyncStatus`]      |
//! | **Worker**     | Owns all jobs, graceful shutdown.                        | [`Worker`], [`Config`]              |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use syncvisor::{CmdProvider, CmdSpec, Config, CtrlAction, Worker};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (worker, mut status) = Worker::new(Config::default());
//!
//!     let spec = CmdSpec::new(["rsync", "-aH", "rsync://mirror.example.org/debian/", "/srv/debian"]);
//!     worker.add_job(Arc::new(CmdProvider::new("debian", spec))).await?;
//!     worker.send("debian", CtrlAction::Start).await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(msg) = status.recv().await {
//!             println!("{} {}", msg.name, msg.status);
//!         }
//!     });
//!
//!     worker.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod provider;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{
    Admission, Admitted, AtomicState, BypassSlot, CmdJob, CmdSpec, CtrlAction, JobContext,
    JobHandle, JobParams, JobState, MirrorJob, Worker, build_environ,
};
pub use error::{JobError, RunnerError, SyncError, WorkerError};
pub use events::{JobMessage, ParseStatusError, StatusSink, SyncStatus};
pub use provider::{
    CmdProvider, Container, EmptyHook, Hook, HookChain, HookPhase, HookRef, Provider, ProviderRef,
};
