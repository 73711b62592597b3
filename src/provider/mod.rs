//! # Providers: the opaque unit of sync work.
//!
//! A [`Provider`] knows *what* to synchronize; the job controller only knows
//! *when*. The controller consumes it as a capability set:
//! - [`Provider::name`] stable job name;
//! - [`Provider::run`] one blocking sync attempt;
//! - [`Provider::terminate`] abort the in-flight attempt;
//! - [`Provider::hooks`] ordered lifecycle hooks (see [`HookChain`]);
//! - [`Provider::container`] optional container the attempt runs in.
//!
//! [`CmdProvider`] is the built-in implementation that runs a command line
//! through the process runner.

mod cmd;
mod hook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SyncError;

pub use cmd::CmdProvider;
pub use hook::{EmptyHook, Hook, HookChain, HookPhase, HookRef};

/// # Opaque sync unit driven by a [`MirrorJob`](crate::MirrorJob).
///
/// # Contract
/// - `run` may be called again after it returns; attempts never overlap.
/// - `terminate` is called while `run` is in flight and must make it return promptly.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use syncvisor::{Provider, HookRef, SyncError};
///
/// struct Rsync;
///
/// #[async_trait]
/// impl Provider for Rsync {
///     fn name(&self) -> &str { "debian" }
///     async fn run(&self) -> Result<(), SyncError> { Ok(()) }
///     async fn terminate(&self) -> Result<(), SyncError> { Ok(()) }
///     fn hooks(&self) -> Vec<HookRef> { Vec::new() }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Returns a stable, human-readable job name.
    fn name(&self) -> &str;

    /// Performs one sync attempt.
    async fn run(&self) -> Result<(), SyncError>;

    /// Aborts the in-flight attempt.
    async fn terminate(&self) -> Result<(), SyncError>;

    /// Returns the lifecycle hooks in invocation order.
    fn hooks(&self) -> Vec<HookRef>;

    /// Returns the container the attempt runs in, if any.
    fn container(&self) -> Option<&Container> {
        None
    }
}

/// Shared handle to a provider.
pub type ProviderRef = Arc<dyn Provider>;

/// Container that hosts a sync process.
///
/// Terminating a containerized attempt is delegated to the container runtime
/// (`<runtime> stop -t <secs> <name>`) instead of signalling the local process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    name: String,
    runtime: String,
}

impl Container {
    /// Creates a handle for a container managed by `docker`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: "docker".to_string(),
        }
    }

    /// Overrides the runtime executable (e.g. `podman`).
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command line asking the runtime to stop the container within `timeout`.
    pub fn stop_command(&self, timeout: Duration) -> Vec<String> {
        vec![
            self.runtime.clone(),
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().max(1).to_string(),
            self.name.clone(),
        ]
    }
}
