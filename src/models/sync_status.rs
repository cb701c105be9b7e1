use chrono::{DateTime, Utc};
use serde::Serialize;

/// The single aggregate value status indicators observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Pending,
    Offline,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Pending => "pending",
            SyncStatus::Offline => "offline",
            SyncStatus::Error => "error",
        }
    }

    /// Derives the status; rules are evaluated in priority order
    pub fn derive(inputs: &StatusInputs) -> Self {
        if !inputs.is_online {
            SyncStatus::Offline
        } else if inputs.in_flight || inputs.uploading_count > 0 {
            SyncStatus::Syncing
        } else if inputs.failed_count > 0 {
            SyncStatus::Error
        } else if inputs.pending_count > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInputs {
    pub is_online: bool,
    /// A drain or submission is running
    pub in_flight: bool,
    /// Photos and completed surveys awaiting their first attempt
    pub pending_count: usize,
    pub uploading_count: usize,
    /// Parked photos plus surveys whose submission failed
    pub failed_count: usize,
}

/// Derived view for status indicators; never stored
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub status: SyncStatus,
    pub is_online: bool,
    pub pending_count: usize,
    pub uploading_count: usize,
    pub failed_count: usize,
    pub storage_bytes_used: u64,
    pub storage_percent_used: f32,
    pub storage_nearly_full: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatusSnapshot {
    pub fn offline() -> Self {
        Self {
            status: SyncStatus::Offline,
            is_online: false,
            pending_count: 0,
            uploading_count: 0,
            failed_count: 0,
            storage_bytes_used: 0,
            storage_percent_used: 0.0,
            storage_nearly_full: false,
            last_synced_at: None,
            last_error: None,
        }
    }
}
