//! # Lifecycle hooks around sync attempts.
//!
//! A provider exposes an ordered list of [`Hook`]s. The job controller invokes one
//! [`HookPhase`] at a time through a [`HookChain`]:
//!
//! ```text
//! pre-job ─► ( pre-exec ─► [provider.run] ─► post-exec ─► post-success | post-fail )*
//!
//! pre-*  phases: hooks[0], hooks[1], ..., hooks[n-1]
//! post-* phases: hooks[n-1], ..., hooks[1], hooks[0]
//! ```
//!
//! Post phases unwind in reverse so the hook that started first finishes last.
//!
//! ## Rules
//! - The first failing hook stops the phase; later hooks are not called.
//! - A failure emits one `failed` message naming the phase and is returned as
//!   [`JobError::Hook`]; the controller aborts the whole run on it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::error::{JobError, SyncError};
use crate::events::{JobMessage, StatusSink, SyncStatus};

/// Lifecycle callbacks invoked around each sync attempt.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Once per run, after admission and before the first attempt.
    async fn pre_job(&self) -> Result<(), SyncError>;

    /// Before every attempt.
    async fn pre_exec(&self) -> Result<(), SyncError>;

    /// After every attempt, whatever its outcome.
    async fn post_exec(&self) -> Result<(), SyncError>;

    /// After a successful attempt.
    async fn post_success(&self) -> Result<(), SyncError>;

    /// After a failed attempt.
    async fn post_fail(&self) -> Result<(), SyncError>;
}

/// Shared handle to a hook.
pub type HookRef = Arc<dyn Hook>;

/// Hook that does nothing, for providers without lifecycle needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyHook;

#[async_trait]
impl Hook for EmptyHook {
    async fn pre_job(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn pre_exec(&self) -> Result<(), SyncError> {
        Ok(())
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

/// Named hook phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// [`Hook::pre_job`].
    PreJob,
    /// [`Hook::pre_exec`].
    PreExec,
    /// [`Hook::post_exec`].
    PostExec,
    /// [`Hook::post_success`].
    PostSuccess,
    /// [`Hook::post_fail`].
    PostFail,
}

impl HookPhase {
    /// Returns the phase name used in logs and status messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::PreJob => "pre-job",
            HookPhase::PreExec => "pre-exec",
            HookPhase::PostExec => "post-exec",
            HookPhase::PostSuccess => "post-success",
            HookPhase::PostFail => "post-fail",
        }
    }

    /// Post phases walk the hook list in reverse.
    #[inline]
    pub fn is_post(&self) -> bool {
        matches!(
            self,
            HookPhase::PostExec | HookPhase::PostSuccess | HookPhase::PostFail
        )
    }

    async fn invoke(self, hook: &dyn Hook) -> Result<(), SyncError> {
        match self {
            HookPhase::PreJob => hook.pre_job().await,
            HookPhase::PreExec => hook.pre_exec().await,
            HookPhase::PostExec => hook.post_exec().await,
            HookPhase::PostSuccess => hook.post_success().await,
            HookPhase::PostFail => hook.post_fail().await,
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of hooks of one provider.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<HookRef>,
}

impl HookChain {
    /// Creates a chain over the provider's hooks, in the provider's order.
    pub fn new(hooks: Vec<HookRef>) -> Self {
        Self { hooks }
    }

    /// Number of hooks in the chain.
    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Runs `phase` on every hook, stopping at the first failure.
    ///
    /// On failure a `failed` message naming the phase is published to `sink`
    /// on behalf of `job` before the error is returned.
    pub async fn run(&self, phase: HookPhase, job: &str, sink: &StatusSink) -> Result<(), JobError> {
        let ordered: Box<dyn Iterator<Item = &HookRef> + Send> = if phase.is_post() {
            Box::new(self.hooks.iter().rev())
        } else {
            Box::new(self.hooks.iter())
        };

        for hook in ordered {
            if let Err(e) = phase.invoke(hook.as_ref()).await {
                error!(job, %phase, error = %e, "failed at {phase} hooks for {job}");
                let err = JobError::Hook { phase, error: e };
                sink.publish(
                    JobMessage::new(SyncStatus::Failed, job).with_msg(err.to_string()),
                )
                .await;
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Appends `"<id>:<phase>"` to a shared journal; optionally fails one phase.
    struct Recorder {
        id: usize,
        journal: Arc<Mutex<Vec<String>>>,
        fail_on: Option<HookPhase>,
    }

    impl Recorder {
        fn record(&self, phase: HookPhase) -> Result<(), SyncError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.id, phase));
            if self.fail_on == Some(phase) {
                return Err(SyncError::fail(format!("hook {} broke", self.id)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Hook for Recorder {
        async fn pre_job(&self) -> Result<(), SyncError> {
            self.record(HookPhase::PreJob)
        }
        async fn pre_exec(&self) -> Result<(), SyncError> {
            self.record(HookPhase::PreExec)
        }
        async fn post_exec(&self) -> Result<(), SyncError> {
            self.record(HookPhase::PostExec)
        }
        async fn post_success(&self) -> Result<(), SyncError> {
            self.record(HookPhase::PostSuccess)
        }
        async fn post_fail(&self) -> Result<(), SyncError> {
            self.record(HookPhase::PostFail)
        }
    }

    fn chain(journal: &Arc<Mutex<Vec<String>>>, n: usize, fail: Option<(usize, HookPhase)>) -> HookChain {
        HookChain::new(
            (0..n)
                .map(|id| {
                    Arc::new(Recorder {
                        id,
                        journal: journal.clone(),
                        fail_on: fail.filter(|(f, _)| *f == id).map(|(_, p)| p),
                    }) as HookRef
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn pre_phases_run_forward_post_phases_run_reversed() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let hooks = chain(&journal, 3, None);
        let (sink, mut rx) = StatusSink::channel(8);

        hooks.run(HookPhase::PreExec, "debian", &sink).await.unwrap();
        hooks.run(HookPhase::PostExec, "debian", &sink).await.unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "0:pre-exec",
                "1:pre-exec",
                "2:pre-exec",
                "2:post-exec",
                "1:post-exec",
                "0:post-exec",
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn first_failure_short_circuits_and_reports() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let hooks = chain(&journal, 3, Some((1, HookPhase::PostFail)));
        let (sink, mut rx) = StatusSink::channel(8);

        let err = hooks
            .run(HookPhase::PostFail, "debian", &sink)
            .await
            .unwrap_err();

        assert_eq!(*journal.lock().unwrap(), vec!["2:post-fail", "1:post-fail"]);
        assert_eq!(err.as_label(), "job_hook_failed");

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.status, SyncStatus::Failed);
        assert_eq!(msg.name, "debian");
        assert_eq!(msg.msg, "error exec hook post-fail: hook 1 broke");
        assert!(!msg.schedule);
    }

    #[tokio::test]
    async fn empty_hook_never_fails() {
        let hooks = HookChain::new(vec![Arc::new(EmptyHook) as HookRef, Arc::new(EmptyHook)]);
        let (sink, _rx) = StatusSink::channel(1);
        for phase in [
            HookPhase::PreJob,
            HookPhase::PreExec,
            HookPhase::PostExec,
            HookPhase::PostSuccess,
            HookPhase::PostFail,
        ] {
            assert!(hooks.run(phase, "noop", &sink).await.is_ok());
        }
    }
}
