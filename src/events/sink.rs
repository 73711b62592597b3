//! # Manager-status sink.
//!
//! [`StatusSink`] is a thin wrapper around a bounded [`tokio::sync::mpsc`] sender
//! shared by every job of a worker.
//!
//! ## Rules
//! - **Ordered**: messages of one job arrive in the order they were published.
//! - **Backpressure**: `publish` waits for buffer space; size the buffer via
//!   [`Config::status_capacity`](crate::Config::status_capacity).
//! - **Detached manager**: if the receiver is gone the message is dropped.

use tokio::sync::mpsc;

use super::message::JobMessage;

/// Sender half of the manager-status channel.
#[derive(Clone, Debug)]
pub struct StatusSink {
    tx: mpsc::Sender<JobMessage>,
}

impl StatusSink {
    /// Creates a sink and the matching receiver for the manager.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publishes a message, waiting for buffer space.
    pub async fn publish(&self, msg: JobMessage) {
        if let Err(mpsc::error::SendError(msg)) = self.tx.send(msg).await {
            tracing::debug!(job = %msg.name, status = %msg.status, "status receiver closed; message dropped");
        }
    }
}
