//! # Worker: owner of every mirror job of the process.
//!
//! The [`Worker`] is built once at startup. It owns the collaborators every job
//! shares and the registry of jobs by name.
//!
//! ## Architecture
//! ```text
//! Worker::new(cfg) ──► Admission(cfg.max_concurrent)      (shared gate)
//!                  ──► StatusSink / Receiver<JobMessage>  (returned to the manager side)
//!                  ──► TaskTracker                        (wait group)
//!
//! add_job(provider) ──► MirrorJob::new ──► tracker.spawn(job.run(ctx))
//!                                          └─► registry[name] = (job, handle)
//!
//! halt() ──► send Halt to every live controller
//!        ──► tracker.close(); wait (bounded by cfg.shutdown_grace)
//!              ├─ Ok                  → all jobs exited
//!              └─ grace exceeded      → WorkerError::GraceExceeded { stuck }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::admission::Admission;
use super::job::{JobContext, JobHandle, JobParams, MirrorJob};
use super::shutdown::shutdown_signal;
use super::{CtrlAction, JobState};
use crate::config::Config;
use crate::error::WorkerError;
use crate::events::{JobMessage, StatusSink};
use crate::provider::ProviderRef;

struct Entry {
    job: Arc<MirrorJob>,
    handle: JobHandle,
}

/// Coordinates all mirror jobs of one worker process.
pub struct Worker {
    cfg: Config,
    ctx: JobContext,
    jobs: RwLock<HashMap<String, Entry>>,
}

impl Worker {
    /// Creates a worker and returns the receiver of all job status messages.
    pub fn new(cfg: Config) -> (Self, mpsc::Receiver<JobMessage>) {
        let (sink, rx) = StatusSink::channel(cfg.status_capacity_clamped());
        let ctx = JobContext {
            sink,
            admission: Arc::new(Admission::new(cfg.concurrency_limit())),
            tracker: TaskTracker::new(),
            params: JobParams::from(&cfg),
        };
        let worker = Self {
            cfg,
            ctx,
            jobs: RwLock::new(HashMap::new()),
        };
        (worker, rx)
    }

    /// Worker configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The admission gate shared by all jobs.
    pub fn admission(&self) -> &Arc<Admission> {
        &self.ctx.admission
    }

    /// Registers a job for `provider` and starts its controller (state `none`).
    pub async fn add_job(&self, provider: ProviderRef) -> Result<JobHandle, WorkerError> {
        let name = provider.name().to_string();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&name) {
            return Err(WorkerError::DuplicateJob { name });
        }

        let (job, handle) = MirrorJob::new(provider, self.cfg.command_capacity_clamped());
        self.spawn_controller(&name, &job);
        jobs.insert(
            name.clone(),
            Entry {
                job,
                handle: handle.clone(),
            },
        );
        info!(job = %name, "job added");
        Ok(handle)
    }

    fn spawn_controller(&self, name: &str, job: &Arc<MirrorJob>) {
        let name = name.to_string();
        let fut = job.clone().run(self.ctx.clone());
        self.ctx.tracker.spawn(async move {
            if let Err(e) = fut.await {
                error!(job = %name, error = %e, label = e.as_label(), "controller failed to start");
            }
        });
    }

    /// Restarts the controller of a disabled job; send `Start` afterwards to run it.
    pub async fn enable(&self, name: &str) -> Result<(), WorkerError> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(name).ok_or_else(|| WorkerError::UnknownJob {
            name: name.to_string(),
        })?;
        if entry.job.state() == JobState::Disabled && entry.job.disabled().is_cancelled() {
            self.spawn_controller(name, &entry.job);
        }
        Ok(())
    }

    /// Returns the job registered under `name`.
    pub async fn job(&self, name: &str) -> Option<Arc<MirrorJob>> {
        self.jobs.read().await.get(name).map(|e| e.job.clone())
    }

    /// Returns the command handle of the job registered under `name`.
    pub async fn handle(&self, name: &str) -> Option<JobHandle> {
        self.jobs.read().await.get(name).map(|e| e.handle.clone())
    }

    /// Sends `action` to the job registered under `name`.
    pub async fn send(&self, name: &str, action: CtrlAction) -> Result<(), WorkerError> {
        let handle = self
            .handle(name)
            .await
            .ok_or_else(|| WorkerError::UnknownJob {
                name: name.to_string(),
            })?;
        handle.send(action).await
    }

    /// Returns the sorted list of job names.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Halts every job and waits for all of them to exit.
    ///
    /// Returns [`WorkerError::GraceExceeded`] listing the jobs still running after
    /// [`Config::shutdown_grace`].
    pub async fn halt(&self) -> Result<(), WorkerError> {
        let live: Vec<(String, Arc<MirrorJob>, JobHandle)> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .filter(|(_, e)| !e.job.disabled().is_cancelled())
                .map(|(name, e)| (name.clone(), e.job.clone(), e.handle.clone()))
                .collect()
        };

        info!(jobs = live.len(), "halting worker");
        join_all(live.iter().map(|(name, _, handle)| async move {
            if let Err(e) = handle.send(CtrlAction::Halt).await {
                warn!(job = %name, error = %e, "halt not delivered");
            }
        }))
        .await;

        self.ctx.tracker.close();
        let grace = self.cfg.shutdown_grace;
        match tokio::time::timeout(grace, self.ctx.tracker.wait()).await {
            Ok(()) => {
                info!("all jobs exited");
                Ok(())
            }
            Err(_) => {
                let mut stuck: Vec<String> = live
                    .into_iter()
                    .filter(|(_, job, _)| !job.disabled().is_cancelled())
                    .map(|(name, _, _)| name)
                    .collect();
                stuck.sort_unstable();
                error!(?grace, ?stuck, "jobs did not exit within grace");
                Err(WorkerError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT, then [`halt`](Self::halt)s.
    pub async fn run_until_signal(&self) -> Result<(), WorkerError> {
        match shutdown_signal().await {
            Ok(signal) => info!(signal, "shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signals; halting"),
        }
        self.halt().await
    }
}
