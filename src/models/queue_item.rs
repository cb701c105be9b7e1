use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upload lifecycle of a queued photo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum QueueState {
    #[default]
    Pending,
    Uploading,
    /// Transient: uploaded items are removed right away
    Uploaded,
    /// Parked until an explicit retry
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &str {
        match self {
            QueueState::Pending => "pending",
            QueueState::Uploading => "uploading",
            QueueState::Uploaded => "uploaded",
            QueueState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => QueueState::Pending,
            "uploading" => QueueState::Uploading,
            "uploaded" => QueueState::Uploaded,
            "failed" => QueueState::Failed,
            // Unknown states from other app versions get another attempt
            _ => QueueState::Pending,
        }
    }
}

impl From<String> for QueueState {
    fn from(s: String) -> Self {
        QueueState::from_str(&s)
    }
}

/// A photo as the upload subsystem knows it
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoQueueItem {
    /// Same id as the draft's `PhotoRef`
    pub id: Uuid,
    /// Owning survey (lookup only)
    pub survey_id: Uuid,
    /// Compressed image bytes
    pub blob: Vec<u8>,
    pub state: QueueState,
    pub attempt_count: u32,
    /// Only set while `state == Failed`
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time of the next automatic attempt
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl PhotoQueueItem {
    pub fn new(id: Uuid, survey_id: Uuid, blob: Vec<u8>) -> Self {
        Self {
            id,
            survey_id,
            blob,
            state: QueueState::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: Utc::now(),
            next_attempt_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map(|at| at <= now).unwrap_or(true)
    }

    pub fn size_bytes(&self) -> u64 {
        self.blob.len() as u64
    }
}

/// Persisted form of a queue item; the blob lives under its own key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueRecord {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub blob_ref: String,
    pub state: QueueState,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueueRecord {
    pub fn from_item(item: &PhotoQueueItem, blob_ref: String) -> Self {
        Self {
            id: item.id,
            survey_id: item.survey_id,
            blob_ref,
            state: item.state,
            attempt_count: item.attempt_count,
            last_error: item.last_error.clone(),
            created_at: item.created_at,
            next_attempt_at: item.next_attempt_at,
        }
    }

    pub fn into_item(self, blob: Vec<u8>) -> PhotoQueueItem {
        PhotoQueueItem {
            id: self.id,
            survey_id: self.survey_id,
            blob,
            state: self.state,
            attempt_count: self.attempt_count,
            last_error: self.last_error,
            created_at: self.created_at,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing_falls_back_to_pending() {
        assert_eq!(QueueState::from_str("FAILED"), QueueState::Failed);
        assert_eq!(QueueState::from_str("paused"), QueueState::Pending);

        let record: QueueRecord =
            serde_json::from_str(r#"{"state":"archived","attemptCount":2}"#).unwrap();
        assert_eq!(record.state, QueueState::Pending);
        assert_eq!(record.attempt_count, 2);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&QueueState::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut item = PhotoQueueItem::new(Uuid::new_v4(), Uuid::new_v4(), vec![1, 2, 3]);
        assert!(item.is_due(now));

        item.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        assert!(!item.is_due(now));
        assert!(item.is_due(now + chrono::Duration::seconds(31)));
    }
}
