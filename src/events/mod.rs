//! Outbound data model: sync statuses, job messages and the manager sink.
//!
//! ## Contents
//! - [`SyncStatus`] status domain with string/JSON forms
//! - [`JobMessage`] one status event of one job
//! - [`StatusSink`] ordered channel towards the manager
//!
//! ## Quick reference
//! - **Publishers**: the job controller and its hook chain.
//! - **Consumer**: whoever holds the receiver returned by [`Worker::new`](crate::Worker::new).

mod message;
mod sink;
mod status;

pub use message::JobMessage;
pub use sink::StatusSink;
pub use status::{ParseStatusError, SyncStatus};
