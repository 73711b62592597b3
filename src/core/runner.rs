//! # Process runner: one external process per sync attempt.
//!
//! [`CmdJob`] owns the full lifecycle of one command invocation:
//!
//! ```text
//! CmdJob::new(spec) ──► start() ──► spawn waiter task ──► child.wait()
//!                          │                                  │
//!                          │                      finished ◄──┘ (watch, set once)
//!                          ▼
//!           wait()      ── waits on `finished`, returns the cached result
//!           terminate() ── container? ──► `<runtime> stop -t N <name>` (failure logged) ─► Ok
//!                          else      ──► SIGTERM to process group
//!                                        ├─ exited within grace ─► Ok
//!                                        └─ grace elapsed ──► SIGKILL ─► Err(GracefulTimeout)
//! ```
//!
//! ## Rules
//! - A `CmdJob` is started at most once and never reused across attempts.
//! - Exactly one task performs the real wait; every `wait()` caller observes the same result.
//! - The child runs in its own process group so signals reach its descendants too.
//! - The log file handle is closed when the process exits.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::provider::Container;

/// Description of a command invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CmdSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory (`None` = inherit).
    pub working_dir: Option<PathBuf>,
    /// Environment overrides; always win over inherited variables.
    pub env: BTreeMap<String, String>,
    /// Start from the worker's own environment.
    pub inherit_env: bool,
    /// File receiving stdout and stderr (`None` = discard).
    pub log_file: Option<PathBuf>,
}

impl CmdSpec {
    /// Creates a spec inheriting the worker environment.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            inherit_env: true,
            ..Self::default()
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Chooses whether the worker environment is inherited.
    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Sets the log file for stdout and stderr.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Builds the child environment: inherited variables (if requested) minus the
/// overridden keys, followed by the overrides.
pub fn build_environ(overrides: &BTreeMap<String, String>, inherit: bool) -> Vec<(OsString, OsString)> {
    let mut environ = Vec::with_capacity(overrides.len());
    if inherit {
        environ.extend(
            std::env::vars_os()
                .filter(|(k, _)| k.to_str().is_none_or(|k| !overrides.contains_key(k))),
        );
    }
    environ.extend(
        overrides
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );
    environ
}

type Outcome = Option<Result<(), RunnerError>>;

/// Live process state, present once `start` succeeded.
struct Process {
    pid: Pid,
    finished: watch::Receiver<Outcome>,
}

/// One external process invocation.
pub struct CmdJob {
    spec: CmdSpec,
    container: Option<Container>,
    grace: Duration,
    container_stop_timeout: Duration,
    process: Mutex<Option<Process>>,
}

impl CmdJob {
    /// Creates an unstarted job with a 2s termination grace.
    pub fn new(spec: CmdSpec, container: Option<Container>) -> Self {
        Self {
            spec,
            container,
            grace: Duration::from_secs(2),
            container_stop_timeout: Duration::from_secs(2),
            process: Mutex::new(None),
        }
    }

    /// Overrides the SIGTERM→SIGKILL grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Overrides the timeout handed to the container runtime.
    pub fn with_container_stop_timeout(mut self, timeout: Duration) -> Self {
        self.container_stop_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<Process>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches the command.
    ///
    /// Must be called from within a tokio runtime: the exit is awaited by a
    /// background task.
    pub fn start(&self) -> Result<(), RunnerError> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(RunnerError::AlreadyStarted);
        }

        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or(RunnerError::EmptyCommand)?;
        let launch_err = |e: std::io::Error| RunnerError::Launch {
            program: program.clone(),
            error: e.to_string(),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(build_environ(&self.spec.env, self.spec.inherit_env))
            .stdin(Stdio::null())
            .process_group(0);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        let log: Option<File> = match &self.spec.log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(launch_err)?;
                cmd.stdout(file.try_clone().map_err(launch_err)?);
                cmd.stderr(file.try_clone().map_err(launch_err)?);
                Some(file)
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
        };

        let mut child = cmd.spawn().map_err(launch_err)?;
        let pid = child.id().ok_or_else(|| RunnerError::Launch {
            program: program.clone(),
            error: "child exited before its pid was read".to_string(),
        })?;
        debug!(pid, program = %program, "process started");

        let (tx, finished) = watch::channel(None);
        tokio::spawn(async move {
            let res = match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(RunnerError::Exited {
                    status: status.to_string(),
                }),
                Err(e) => Err(RunnerError::Wait {
                    error: e.to_string(),
                }),
            };
            drop(log);
            let _ = tx.send(Some(res));
        });

        *slot = Some(Process {
            pid: Pid::from_raw(pid as i32),
            finished,
        });
        Ok(())
    }

    fn finished(&self) -> Result<(Pid, watch::Receiver<Outcome>), RunnerError> {
        let slot = self.lock();
        let process = slot.as_ref().ok_or(RunnerError::ProcessNotStarted)?;
        Ok((process.pid, process.finished.clone()))
    }

    /// Waits for the process to exit and returns its terminal result.
    ///
    /// Idempotent: once the process has exited every call returns the cached result.
    pub async fn wait(&self) -> Result<(), RunnerError> {
        let (_, mut finished) = self.finished()?;
        await_outcome(&mut finished).await
    }

    /// Returns true once the process has exited.
    pub fn is_finished(&self) -> bool {
        self.finished()
            .map(|(_, rx)| rx.borrow().is_some())
            .unwrap_or(false)
    }

    /// Stops the process.
    ///
    /// Containerized jobs are handed to the container runtime's `stop`; its failure
    /// is logged, not returned, since the kill belongs to that runtime. Otherwise the
    /// process group receives SIGTERM and, if it is still alive after the grace
    /// period, SIGKILL; the latter case returns [`RunnerError::GracefulTimeout`].
    pub async fn terminate(&self) -> Result<(), RunnerError> {
        let (pid, mut finished) = self.finished()?;

        if let Some(container) = &self.container {
            if let Err(e) = self.stop_container(container).await {
                warn!(container = container.name(), error = %e, label = e.as_label(), "container stop failed");
            }
            return Ok(());
        }
        if finished.borrow().is_some() {
            return Ok(());
        }

        signal_group(pid, Signal::SIGTERM)?;
        match time::timeout(self.grace, await_outcome(&mut finished)).await {
            Ok(_) => Ok(()),
            Err(_elapsed) => {
                warn!(pid = pid.as_raw(), grace = ?self.grace, "SIGTERM failed to stop the process; sending SIGKILL");
                if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                    warn!(pid = pid.as_raw(), error = %e, "SIGKILL failed");
                }
                Err(RunnerError::GracefulTimeout { grace: self.grace })
            }
        }
    }

    async fn stop_container(&self, container: &Container) -> Result<(), RunnerError> {
        let argv = container.stop_command(self.container_stop_timeout);
        let stop_err = |error: String| RunnerError::ContainerStop {
            container: container.name().to_string(),
            error,
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| stop_err("empty runtime command".to_string()))?;

        debug!(container = container.name(), runtime = %program, "stopping container");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| stop_err(e.to_string()))?;
        if !output.status.success() {
            return Err(stop_err(format!(
                "{program} stop exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

async fn await_outcome(finished: &mut watch::Receiver<Outcome>) -> Result<(), RunnerError> {
    match finished.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Ok(())),
        Err(_) => Err(RunnerError::Wait {
            error: "process waiter exited without a result".to_string(),
        }),
    }
}

/// Signals the whole process group; a group that is already gone is not an error.
fn signal_group(pid: Pid, signal: Signal) -> Result<(), RunnerError> {
    match killpg(pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(RunnerError::Signal {
            signal: signal.as_str(),
            error: e.to_string(),
        }),
    }
}
