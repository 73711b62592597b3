//! # Command-line provider.
//!
//! [`CmdProvider`] syncs a mirror by running one command per attempt through a
//! fresh [`CmdJob`]. `terminate` forwards to the attempt in flight and does
//! nothing between attempts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Container, Hook, HookRef, Provider};
use crate::config::Config;
use crate::core::{CmdJob, CmdSpec};
use crate::error::SyncError;


/// Provider running a command line per attempt.
pub struct CmdProvider {
    name: String,
    spec: CmdSpec,
    hooks: Vec<HookRef>,
    container: Option<Container>,
    grace: Duration,
    container_stop_timeout: Duration,
    current: Mutex<Option<Arc<CmdJob>>>,
}

impl CmdProvider {
    /// Creates a provider with no hooks and no container.
    pub fn new(name: impl Into<String>, spec: CmdSpec) -> Self {
        let defaults = Config::default();
        Self {
            name: name.into(),
            spec,
            hooks: Vec::new(),
            container: None,
            grace: defaults.terminate_grace,
            container_stop_timeout: defaults.container_stop_timeout,
            current: Mutex::new(None),
        }
    }

    /// Appends a lifecycle hook.
    pub fn with_hook(mut self, hook: impl Hook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Runs every attempt inside `container`.
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Takes the termination timings from the worker configuration.
    pub fn with_config(mut self, cfg: &Config) -> Self {
        self.grace = cfg.terminate_grace;
        self.container_stop_timeout = cfg.container_stop_timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<CmdJob>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for CmdProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), SyncError> {
        let job = Arc::new(
            CmdJob::new(self.spec.clone(), self.container.clone())
                .with_grace(self.grace)
                .with_container_stop_timeout(self.container_stop_timeout),
        );
        job.start()?;
        *self.lock() = Some(job.clone());

        let res = job.wait().await;
        {
            let mut current = self.lock();
            // A later attempt may already own the slot.
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &job)) {
                *current = None;
            }
        }
        res.map_err(SyncError::from)
    }

    async fn terminate(&self) -> Result<(), SyncError> {
        let current = self.lock().clone();
        let Some(job) = current else {
            debug!(job = %self.name, "no attempt in flight; terminate ignored");
            return Ok(());
        };
        job.terminate().await.map_err(SyncError::from)
    }

    fn hooks(&self) -> Vec<HookRef> {
        self.hooks.clone()
    }

    fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }
}
