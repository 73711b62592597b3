//! # OS shutdown signals.
//!
//! [`shutdown_signal`] completes when the worker process receives SIGINT
//! (Ctrl-C), SIGTERM (systemd/Kubernetes stop) or SIGQUIT.

use tokio::signal::unix::{SignalKind, signal};

/// Waits for a termination signal and returns its name.
///
/// Each call registers independent listeners; fails only if registration fails.
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}
