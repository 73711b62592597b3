//! # MirrorJob: the per-mirror controller.
//!
//! One controller loop per job multiplexes control actions from the manager
//! against at most one in-flight run task.
//!
//! ## Architecture
//! ```text
//! manager ── CtrlAction ──► JobHandle ──► MirrorJob::run() (controller loop)
//!                                              │
//!            state == ready ─► spawn run task ─┤
//!                                              ▼
//!   run task:  admit (slot | bypass | kill)
//!              ├─► publish pre-syncing
//!              ├─► hooks: pre-job
//!              └─► for retry in 0..max_retry {
//!                    hooks: pre-exec
//!                    publish syncing
//!                    provider.run()  ◄── races ──  kill → provider.terminate()
//!                    hooks: post-exec
//!                    Ok  → publish success → hooks: post-success → done
//!                    Err → publish failed  → hooks: post-fail
//!                          └─ killed? → done (no retry)
//!                  }
//! ```
//!
//! ## Rules
//! - Only the controller loop writes the job state.
//! - A control action is handled to completion (including awaiting a killed run)
//!   before the next one is read; `start`/`force-start`/`ping` never tear anything down.
//! - Errors inside the run task never end the controller; they become status messages.
//! - Messages of one job are published in program order.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::action::CtrlAction;
use super::admission::{Admission, BypassSlot};
use super::state::{AtomicState, JobState};
use crate::config::Config;
use crate::error::{JobError, SyncError, WorkerError};
use crate::events::{JobMessage, StatusSink, SyncStatus};
use crate::provider::{HookChain, HookPhase, ProviderRef};

/// Per-job parameters extracted from [`Config`].
#[derive(Clone, Copy, Debug)]
pub struct JobParams {
    /// Provider attempts per run.
    pub max_retry: usize,
    /// Pause after a `restart` tear-down.
    pub restart_delay: Duration,
}

impl From<&Config> for JobParams {
    fn from(cfg: &Config) -> Self {
        Self {
            max_retry: cfg.attempts(),
            restart_delay: cfg.restart_delay,
        }
    }
}

/// Shared collaborators handed to every controller of a worker.
#[derive(Clone)]
pub struct JobContext {
    /// Manager-status channel.
    pub sink: StatusSink,
    /// Global admission gate.
    pub admission: Arc<Admission>,
    /// Wait group of controllers and their run tasks.
    pub tracker: TaskTracker,
    /// Retry and restart parameters.
    pub params: JobParams,
}

/// Sender side of a job's command channel.
#[derive(Clone, Debug)]
pub struct JobHandle {
    name: String,
    tx: mpsc::Sender<CtrlAction>,
}

impl JobHandle {
    /// Name of the job this handle controls.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends an action, waiting if the channel is full.
    pub async fn send(&self, action: CtrlAction) -> Result<(), WorkerError> {
        self.tx.send(action).await.map_err(|_| WorkerError::Closed {
            name: self.name.clone(),
        })
    }

    /// Sends an action without waiting.
    pub fn try_send(&self, action: CtrlAction) -> Result<(), WorkerError> {
        self.tx.try_send(action).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::Busy {
                name: self.name.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => WorkerError::Closed {
                name: self.name.clone(),
            },
        })
    }
}

/// How a supervised run ended, from the controller's point of view.
enum RunExit {
    /// The run task finished on its own, or was stopped; wait for the next action.
    Idle,
    /// Torn down by `restart`; start again after the restart delay.
    Restart,
    /// The controller must return.
    Return,
}

/// Controller of one mirror.
pub struct MirrorJob {
    provider: RwLock<ProviderRef>,
    state: AtomicState,
    commands: Mutex<Option<mpsc::Receiver<CtrlAction>>>,
    disabled: Mutex<CancellationToken>,
}

impl MirrorJob {
    /// Creates a job in state `none` and the handle used to control it.
    pub fn new(provider: ProviderRef, command_capacity: usize) -> (Arc<Self>, JobHandle) {
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        let handle = JobHandle {
            name: provider.name().to_string(),
            tx,
        };
        let job = Arc::new(Self {
            provider: RwLock::new(provider),
            state: AtomicState::new(JobState::None),
            commands: Mutex::new(Some(rx)),
            disabled: Mutex::new(CancellationToken::new()),
        });
        (job, handle)
    }

    /// Job name, taken from the provider.
    pub fn name(&self) -> String {
        self.provider().name().to_string()
    }

    /// Current provider.
    pub fn provider(&self) -> ProviderRef {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state.load()
    }

    fn set_state(&self, state: JobState) {
        self.state.store(state);
    }

    /// Swaps the provider; only allowed in `none` or `disabled`.
    pub fn set_provider(&self, provider: ProviderRef) -> Result<(), JobError> {
        let state = self.state();
        if state != JobState::None && state != JobState::Disabled {
            return Err(JobError::InvalidState { state });
        }
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = provider;
        Ok(())
    }

    /// Token cancelled when the current (or last) controller loop returns.
    pub fn disabled(&self) -> CancellationToken {
        self.lock_disabled().clone()
    }

    fn lock_disabled(&self) -> MutexGuard<'_, CancellationToken> {
        self.disabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_commands(&self) -> MutexGuard<'_, Option<mpsc::Receiver<CtrlAction>>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the controller loop until `disable`, `halt` or a closed command channel.
    ///
    /// May be called again after it returned (e.g. to re-enable a disabled job).
    pub async fn run(self: Arc<Self>, ctx: JobContext) -> Result<(), JobError> {
        let mut commands = self.lock_commands().take().ok_or(JobError::AlreadyRunning)?;

        let disabled = {
            let mut slot = self.lock_disabled();
            if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }
            slot.clone()
        };
        let _disabled = disabled.drop_guard();

        self.control_loop(&mut commands, &ctx).await;

        *self.lock_commands() = Some(commands);
        debug!(job = %self.name(), state = %self.state(), "controller exited");
        Ok(())
    }

    async fn control_loop(self: &Arc<Self>, commands: &mut mpsc::Receiver<CtrlAction>, ctx: &JobContext) {
        let bypass = Arc::new(BypassSlot::new());

        loop {
            if self.state() == JobState::Ready {
                match self.supervise_run(commands, ctx, &bypass).await {
                    RunExit::Idle => {}
                    RunExit::Restart => {
                        // The killed process may still be releasing its resources.
                        time::sleep(ctx.params.restart_delay).await;
                        continue;
                    }
                    RunExit::Return => return,
                }
            }

            let Some(action) = commands.recv().await else {
                debug!(job = %self.name(), "command channel closed");
                return;
            };
            debug!(job = %self.name(), %action, "control action while idle");
            match action {
                CtrlAction::Stop => self.set_state(JobState::Paused),
                CtrlAction::Disable => {
                    self.set_state(JobState::Disabled);
                    return;
                }
                CtrlAction::ForceStart => {
                    request_bypass(&self.name(), &bypass);
                    self.set_state(JobState::Ready);
                }
                CtrlAction::Restart | CtrlAction::Start => self.set_state(JobState::Ready),
                CtrlAction::Ping => {}
                CtrlAction::Halt => {
                    self.set_state(JobState::Halting);
                    return;
                }
            }
        }
    }

    /// Spawns one run task and services control actions until it is over.
    async fn supervise_run(
        self: &Arc<Self>,
        commands: &mut mpsc::Receiver<CtrlAction>,
        ctx: &JobContext,
        bypass: &Arc<BypassSlot>,
    ) -> RunExit {
        let provider = self.provider();
        let name = provider.name().to_string();
        let kill = CancellationToken::new();
        let mut run = ctx.tracker.spawn(Arc::clone(self).run_job(
            provider,
            ctx.clone(),
            bypass.clone(),
            kill.clone(),
        ));

        loop {
            tokio::select! {
                res = &mut run => {
                    log_run_result(&name, res);
                    return RunExit::Idle;
                }
                action = commands.recv() => {
                    let Some(action) = action else {
                        debug!(job = %name, "command channel closed; killing run");
                        kill_and_wait(&name, &kill, &mut run).await;
                        return RunExit::Return;
                    };
                    debug!(job = %name, %action, "control action while running");
                    match action {
                        CtrlAction::Stop => {
                            self.set_state(JobState::Paused);
                            kill_and_wait(&name, &kill, &mut run).await;
                            return RunExit::Idle;
                        }
                        CtrlAction::Disable => {
                            self.set_state(JobState::Disabled);
                            kill_and_wait(&name, &kill, &mut run).await;
                            return RunExit::Return;
                        }
                        CtrlAction::Restart => {
                            self.set_state(JobState::Ready);
                            kill_and_wait(&name, &kill, &mut run).await;
                            return RunExit::Restart;
                        }
                        CtrlAction::ForceStart => {
                            request_bypass(&name, bypass);
                            self.set_state(JobState::Ready);
                        }
                        CtrlAction::Start => self.set_state(JobState::Ready),
                        CtrlAction::Ping => {}
                        CtrlAction::Halt => {
                            self.set_state(JobState::Halting);
                            kill_and_wait(&name, &kill, &mut run).await;
                            return RunExit::Return;
                        }
                    }
                }
            }
        }
    }

    /// Body of the run task: admission, then the sync loop.
    async fn run_job(
        self: Arc<Self>,
        provider: ProviderRef,
        ctx: JobContext,
        bypass: Arc<BypassSlot>,
        kill: CancellationToken,
    ) -> Result<(), JobError> {
        let name = provider.name().to_string();
        let Some(_admitted) = ctx.admission.admit(&name, &bypass, &kill).await else {
            debug!(job = %name, "killed before admission");
            return Ok(());
        };
        self.sync(&provider, &ctx, &kill).await
    }

    async fn sync(
        &self,
        provider: &ProviderRef,
        ctx: &JobContext,
        kill: &CancellationToken,
    ) -> Result<(), JobError> {
        let name = provider.name();
        let sink = &ctx.sink;
        let attempts = ctx.params.max_retry.max(1);

        sink.publish(JobMessage::new(SyncStatus::PreSyncing, name)).await;
        info!(job = name, "start syncing: {name}");

        let hooks = HookChain::new(provider.hooks());
        debug!(job = name, hooks = hooks.len(), "hooks: pre-job");
        hooks.run(HookPhase::PreJob, name, sink).await?;

        for retry in 0..attempts {
            if retry > 0 {
                info!(job = name, retry, "retry syncing: {name}, retry: {retry}");
            }
            hooks.run(HookPhase::PreExec, name, sink).await?;

            sink.publish(JobMessage::new(SyncStatus::Syncing, name)).await;
            let (outcome, stop_asap) = self.attempt(provider, kill).await?;

            hooks.run(HookPhase::PostExec, name, sink).await?;

            match outcome {
                Ok(()) => {
                    info!(job = name, "succeeded syncing {name}");
                    let schedule = self.state() == JobState::Ready;
                    sink.publish(
                        JobMessage::new(SyncStatus::Success, name).with_schedule(schedule),
                    )
                    .await;
                    hooks.run(HookPhase::PostSuccess, name, sink).await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(job = name, error = %e, "failed syncing {name}: {e}");
                    let schedule = retry + 1 == attempts && self.state() == JobState::Ready;
                    sink.publish(
                        JobMessage::new(SyncStatus::Failed, name)
                            .with_msg(e.to_string())
                            .with_schedule(schedule),
                    )
                    .await;

                    debug!(job = name, "post-fail hooks");
                    hooks.run(HookPhase::PostFail, name, sink).await?;

                    if stop_asap {
                        debug!(job = name, "no retry, exit directly");
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs one provider attempt, racing it against `kill`.
    ///
    /// The attempt is polled before `kill` is checked, so `terminate` only ever
    /// reaches an attempt that has started. Returns the attempt outcome and
    /// whether it was killed.
    async fn attempt(
        &self,
        provider: &ProviderRef,
        kill: &CancellationToken,
    ) -> Result<(Result<(), SyncError>, bool), JobError> {
        let name = provider.name();
        let sync = AssertUnwindSafe(provider.run())
            .catch_unwind()
            .map(|res| res.unwrap_or_else(|_| Err(SyncError::fail("provider panicked"))));
        tokio::pin!(sync);

        tokio::select! {
            biased;
            res = &mut sync => {
                debug!(job = name, "syncing done");
                Ok((res, false))
            }
            _ = kill.cancelled() => {
                debug!(job = name, "received kill");
                if let Err(error) = provider.terminate().await {
                    error!(job = name, %error, "failed to terminate provider {name}");
                    return Err(JobError::Terminate { job: name.to_string(), error });
                }
                let _ = sync.await;
                Ok((Err(SyncError::Killed), true))
            }
        }
    }
}

fn request_bypass(name: &str, bypass: &BypassSlot) {
    if !bypass.try_set() {
        debug!(job = name, "bypass already pending; force-start dropped");
    }
}

async fn kill_and_wait(
    name: &str,
    kill: &CancellationToken,
    run: &mut JoinHandle<Result<(), JobError>>,
) {
    kill.cancel();
    log_run_result(name, run.await);
}

fn log_run_result(name: &str, res: Result<Result<(), JobError>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => debug!(job = name, "job done"),
        Ok(Err(e)) => error!(job = name, label = e.as_label(), error = %e, "run aborted"),
        Err(e) => error!(job = name, error = %e, "run task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CmdSpec;
    use crate::provider::{CmdProvider, Hook, HookRef, Provider};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Provider returning scripted outcomes, or blocking until terminated.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<(), SyncError>>>,
        fallback: Option<SyncError>,
        block: bool,
        stop: Notify,
        runs: AtomicUsize,
        terminations: AtomicUsize,
        terminate_error: Option<SyncError>,
        hooks: Vec<HookRef>,
    }

    impl Scripted {
        fn always_fail() -> Self {
            Self {
                fallback: Some(SyncError::fail("rsync exited 23")),
                ..Self::default()
            }
        }

        fn blocking() -> Self {
            Self {
                block: true,
                ..Self::default()
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "debian"
        }

        async fn run(&self) -> Result<(), SyncError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.block {
                self.stop.notified().await;
                return Err(SyncError::fail("terminated"));
            }
            let next = self.outcomes.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone().map_or(Ok(()), Err))
        }

        async fn terminate(&self) -> Result<(), SyncError> {
            self.terminations.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.terminate_error {
                return Err(e.clone());
            }
            self.stop.notify_one();
            Ok(())
        }

        fn hooks(&self) -> Vec<HookRef> {
            self.hooks.clone()
        }
    }

    struct FailingPreExec;

    #[async_trait]
    impl Hook for FailingPreExec {
        async fn pre_job(&self) -> Result<(), SyncError> {
            Ok(())
        }
        async fn pre_exec(&self) -> Result<(), SyncError> {
            Err(SyncError::fail("no space left"))
        }
        async fn post_exec(&self) -> Result<(), SyncError> {
            Ok(())
        }
        async fn post_success(&self) -> Result<(), SyncError> {
            Ok(())
        }
        async fn post_fail(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    struct Harness {
        job: Arc<MirrorJob>,
        handle: JobHandle,
        ctx: JobContext,
        rx: mpsc::Receiver<JobMessage>,
        controller: JoinHandle<Result<(), JobError>>,
    }

    fn harness(provider: ProviderRef, capacity: usize, max_retry: usize) -> Harness {
        let (sink, rx) = StatusSink::channel(64);
        let ctx = JobContext {
            sink,
            admission: Arc::new(Admission::new(capacity)),
            tracker: TaskTracker::new(),
            params: JobParams {
                max_retry,
                restart_delay: Duration::from_millis(10),
            },
        };
        let (job, handle) = MirrorJob::new(provider, 1);
        let controller = tokio::spawn(job.clone().run(ctx.clone()));
        Harness {
            job,
            handle,
            ctx,
            rx,
            controller,
        }
    }

    impl Harness {
        async fn next(&mut self) -> JobMessage {
            timeout(WAIT, self.rx.recv()).await.unwrap().unwrap()
        }

        async fn expect(&mut self, status: SyncStatus) -> JobMessage {
            let msg = self.next().await;
            assert_eq!(msg.status, status, "unexpected message {msg:?}");
            msg
        }

        async fn finish(self) -> mpsc::Receiver<JobMessage> {
            timeout(WAIT, self.controller).await.unwrap().unwrap().unwrap();
            self.rx
        }
    }

    async fn settle() {
        time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let provider = Arc::new(Scripted::default());
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;
        let done = h.expect(SyncStatus::Success).await;
        assert!(done.schedule);
        assert_eq!(done.name, "debian");

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.runs(), 1);
    }

    #[tokio::test]
    async fn retries_until_exhausted_and_marks_last_failure() {
        let provider = Arc::new(Scripted::always_fail());
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        let mut flags = Vec::new();
        for _ in 0..3 {
            h.expect(SyncStatus::Syncing).await;
            let failed = h.expect(SyncStatus::Failed).await;
            assert_eq!(failed.msg, "rsync exited 23");
            flags.push(failed.schedule);
        }
        assert_eq!(flags, vec![false, false, true]);

        h.handle.send(CtrlAction::Halt).await.unwrap();
        let job = h.job.clone();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.runs(), 3);
        assert_eq!(job.state(), JobState::Halting);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let provider = Arc::new(Scripted::default());
        provider
            .outcomes
            .lock()
            .unwrap()
            .push_back(Err(SyncError::fail("timeout")));
        let mut h = harness(provider.clone(), 1, 2);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;
        assert!(!h.expect(SyncStatus::Failed).await.schedule);
        h.expect(SyncStatus::Syncing).await;
        assert!(h.expect(SyncStatus::Success).await.schedule);

        h.handle.send(CtrlAction::Disable).await.unwrap();
        h.finish().await;
    }

    #[tokio::test]
    async fn disable_kills_run_and_returns() {
        let provider = Arc::new(Scripted::blocking());
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let killed = h.expect(SyncStatus::Failed).await;
        assert_eq!(killed.msg, "killed by manager");
        assert!(!killed.schedule);

        let job = h.job.clone();
        let disabled = job.disabled();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(job.state(), JobState::Disabled);
        assert!(disabled.is_cancelled());
        assert_eq!(provider.terminations.load(Ordering::SeqCst), 1);
        assert_eq!(provider.runs(), 1);
    }

    #[tokio::test]
    async fn stop_pauses_and_start_resumes() {
        let provider = Arc::new(Scripted::blocking());
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Stop).await.unwrap();
        h.expect(SyncStatus::Failed).await;
        settle().await;
        assert_eq!(h.job.state(), JobState::Paused);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;
        assert_eq!(h.job.state(), JobState::Ready);

        h.handle.send(CtrlAction::Halt).await.unwrap();
        h.expect(SyncStatus::Failed).await;
        h.finish().await;
        assert_eq!(provider.runs(), 2);
    }

    #[tokio::test]
    async fn restart_tears_down_and_runs_again() {
        let provider = Arc::new(Scripted::blocking());
        let mut h = harness(provider.clone(), 1, 1);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Restart).await.unwrap();
        let killed = h.expect(SyncStatus::Failed).await;
        assert!(killed.schedule, "state stays ready across a restart");
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Disable).await.unwrap();
        h.expect(SyncStatus::Failed).await;
        h.finish().await;
        assert_eq!(provider.runs(), 2);
    }

    #[tokio::test]
    async fn start_and_ping_while_running_are_no_ops() {
        let provider = Arc::new(Scripted::blocking());
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.handle.send(CtrlAction::Ping).await.unwrap();
        h.handle.send(CtrlAction::ForceStart).await.unwrap();
        settle().await;
        assert!(h.rx.try_recv().is_err());
        assert_eq!(provider.terminations.load(Ordering::SeqCst), 0);

        h.handle.send(CtrlAction::Halt).await.unwrap();
        h.expect(SyncStatus::Failed).await;
        h.finish().await;
    }

    #[tokio::test]
    async fn force_start_bypasses_full_gate() {
        let provider = Arc::new(Scripted::default());
        let mut h = harness(provider.clone(), 1, 1);
        let _held = h
            .ctx
            .admission
            .admit("other", &BypassSlot::new(), &CancellationToken::new())
            .await;

        h.handle.send(CtrlAction::Start).await.unwrap();
        settle().await;
        assert!(h.rx.try_recv().is_err(), "gate is full, nothing may run");

        h.handle.send(CtrlAction::ForceStart).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;
        h.expect(SyncStatus::Success).await;

        h.handle.send(CtrlAction::Disable).await.unwrap();
        h.finish().await;
    }

    #[tokio::test]
    async fn stop_before_admission_emits_nothing() {
        let provider = Arc::new(Scripted::default());
        let h = harness(provider.clone(), 1, 1);
        let _held = h
            .ctx
            .admission
            .admit("other", &BypassSlot::new(), &CancellationToken::new())
            .await;

        h.handle.send(CtrlAction::Start).await.unwrap();
        settle().await;
        h.handle.send(CtrlAction::Stop).await.unwrap();
        settle().await;
        assert_eq!(h.job.state(), JobState::Paused);

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.runs(), 0);
    }

    #[tokio::test]
    async fn terminate_failure_aborts_run_silently() {
        let provider = Arc::new(Scripted {
            block: true,
            terminate_error: Some(SyncError::fail("process is stuck in D state")),
            ..Scripted::default()
        });
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Stop).await.unwrap();
        settle().await;
        assert_eq!(h.job.state(), JobState::Paused);
        assert!(h.rx.try_recv().is_err(), "no failed message for a terminate error");

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        h.expect(SyncStatus::Syncing).await;

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.terminations.load(Ordering::SeqCst), 2);
        assert_eq!(provider.runs(), 2);
    }

    #[tokio::test]
    async fn launch_error_is_reported_and_retried() {
        let provider = Arc::new(CmdProvider::new(
            "debian",
            CmdSpec::new(["/nonexistent/rsync", "-aH"]),
        ));
        let mut h = harness(provider, 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        for retry in 0..3 {
            h.expect(SyncStatus::Syncing).await;
            let failed = h.expect(SyncStatus::Failed).await;
            assert!(
                failed.msg.starts_with("failed to launch /nonexistent/rsync"),
                "unexpected detail {:?}",
                failed.msg
            );
            assert_eq!(failed.schedule, retry == 2);
        }

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hook_failure_aborts_whole_run() {
        let provider = Arc::new(Scripted {
            fallback: Some(SyncError::fail("unreachable")),
            hooks: vec![Arc::new(FailingPreExec)],
            ..Scripted::default()
        });
        let mut h = harness(provider.clone(), 1, 3);

        h.handle.send(CtrlAction::Start).await.unwrap();
        h.expect(SyncStatus::PreSyncing).await;
        let failed = h.expect(SyncStatus::Failed).await;
        assert_eq!(failed.msg, "error exec hook pre-exec: no space left");

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let mut rx = h.finish().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.runs(), 0);
    }

    #[tokio::test]
    async fn provider_switch_only_when_idle() {
        let provider = Arc::new(Scripted::blocking());
        let (job, handle) = MirrorJob::new(provider.clone(), 1);
        assert_eq!(job.state(), JobState::None);
        assert!(job.set_provider(provider.clone()).is_ok());

        let h = {
            let (sink, rx) = StatusSink::channel(64);
            let ctx = JobContext {
                sink,
                admission: Arc::new(Admission::new(1)),
                tracker: TaskTracker::new(),
                params: JobParams {
                    max_retry: 1,
                    restart_delay: Duration::from_millis(10),
                },
            };
            let controller = tokio::spawn(job.clone().run(ctx.clone()));
            Harness {
                job: job.clone(),
                handle,
                ctx,
                rx,
                controller,
            }
        };

        h.handle.send(CtrlAction::Start).await.unwrap();
        settle().await;
        assert_eq!(
            job.set_provider(provider.clone()),
            Err(JobError::InvalidState {
                state: JobState::Ready
            })
        );
        assert!(matches!(
            job.clone().run(h.ctx.clone()).await,
            Err(JobError::AlreadyRunning)
        ));

        h.handle.send(CtrlAction::Disable).await.unwrap();
        h.finish().await;
        assert!(job.set_provider(provider).is_ok());
    }

    #[tokio::test]
    async fn disabled_job_can_run_again() {
        let provider = Arc::new(Scripted::default());
        let h = harness(provider.clone(), 1, 1);

        h.handle.send(CtrlAction::Disable).await.unwrap();
        let job = h.job.clone();
        let handle = h.handle.clone();
        let ctx = h.ctx.clone();
        let mut rx = h.finish().await;
        assert_eq!(job.state(), JobState::Disabled);

        let controller = tokio::spawn(job.clone().run(ctx));
        handle.send(CtrlAction::Start).await.unwrap();
        assert_eq!(
            timeout(WAIT, rx.recv()).await.unwrap().unwrap().status,
            SyncStatus::PreSyncing
        );
        handle.send(CtrlAction::Halt).await.unwrap();
        timeout(WAIT, controller).await.unwrap().unwrap().unwrap();
        assert_eq!(provider.runs(), 1);
    }
}
