//! # Sync status reported to the manager.
//!
//! [`SyncStatus`] is the status domain carried by every [`JobMessage`](crate::JobMessage).
//! It has a stable lowercase string form used both by `Display`/`FromStr` and by serde:
//!
//! ```text
//! none | failed | success | syncing | pre-syncing | paused | disabled
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a mirror as seen by the manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Nothing reported yet.
    #[default]
    None,
    /// The last attempt failed.
    Failed,
    /// The last attempt succeeded.
    Success,
    /// An attempt is running.
    Syncing,
    /// The job was admitted and is running its pre-job hooks.
    PreSyncing,
    /// The job was stopped and may be resumed.
    Paused,
    /// The job was disabled.
    Disabled,
}

impl SyncStatus {
    /// Returns the canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::None => "none",
            SyncStatus::Failed => "failed",
            SyncStatus::Success => "success",
            SyncStatus::Syncing => "syncing",
            SyncStatus::PreSyncing => "pre-syncing",
            SyncStatus::Paused => "paused",
            SyncStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status value: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for SyncStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SyncStatus::None),
            "failed" => Ok(SyncStatus::Failed),
            "success" => Ok(SyncStatus::Success),
            "syncing" => Ok(SyncStatus::Syncing),
            "pre-syncing" => Ok(SyncStatus::PreSyncing),
            "paused" => Ok(SyncStatus::Paused),
            "disabled" => Ok(SyncStatus::Disabled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}
