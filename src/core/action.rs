//! Control actions sent by the manager to one job.

use std::fmt;

/// Command consumed once from a job's command channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CtrlAction {
    /// Make the job ready to run; idempotent while running.
    Start,
    /// Kill the current run and pause.
    Stop,
    /// Kill the current run and end the controller.
    Disable,
    /// Kill the current run and start a fresh one.
    Restart,
    /// Liveness probe; no effect.
    Ping,
    /// Kill the current run, the worker is shutting down.
    Halt,
    /// Like `Start`, but the run may skip the concurrency limit.
    ForceStart,
}

impl CtrlAction {
    /// Returns the action name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CtrlAction::Start => "start",
            CtrlAction::Stop => "stop",
            CtrlAction::Disable => "disable",
            CtrlAction::Restart => "restart",
            CtrlAction::Ping => "ping",
            CtrlAction::Halt => "halt",
            CtrlAction::ForceStart => "force-start",
        }
    }
}

impl fmt::Display for CtrlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
