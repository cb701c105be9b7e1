//! Durable, ordered queue of photos awaiting upload.
//!
//! The queue is the only place that decides how many uploads are in flight:
//! `next_batch` hands out at most `max_concurrency - uploading_count` items.

use crate::models::{PhotoQueueItem, QueueRecord, QueueState};
use crate::services::backoff::RetryPolicy;
use crate::services::transport::FailureKind;
use crate::storage::{self, KeyValueStore, BLOB_PREFIX, QUEUE_PREFIX};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub fn queue_key(id: &Uuid) -> String {
    format!("{}{}", QUEUE_PREFIX, id)
}

pub fn blob_key(id: &Uuid) -> String {
    format!("{}{}", BLOB_PREFIX, id)
}

pub struct PhotoQueue {
    /// Ordered by `created_at`
    items: Vec<PhotoQueueItem>,
    policy: RetryPolicy,
    storage: Arc<dyn KeyValueStore>,
}

impl PhotoQueue {
    pub fn new(policy: RetryPolicy, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            items: Vec::new(),
            policy,
            storage,
        }
    }

    /// Restores the persisted queue.
    ///
    /// Items persisted as `uploading` were interrupted and go back to
    /// `pending`. Malformed records and records without a blob are dropped.
    pub fn load(policy: RetryPolicy, storage: Arc<dyn KeyValueStore>) -> Self {
        let mut queue = Self::new(policy, storage);

        let keys = match queue.storage.keys_with_prefix(QUEUE_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Could not list queued photos: {}", e);
                Vec::new()
            }
        };

        for key in keys {
            let key_id = Uuid::parse_str(&key[QUEUE_PREFIX.len()..]).ok();
            let record = storage::read_record::<QueueRecord>(queue.storage.as_ref(), &key)
                .map(|mut record| {
                    if record.id.is_nil() {
                        record.id = key_id.unwrap_or_default();
                    }
                    record
                })
                .filter(|record| Some(record.id) == key_id);

            let Some(record) = record else {
                log::warn!("Dropping unreadable queue record {}", key);
                storage::remove_key(queue.storage.as_ref(), &key);
                if let Some(id) = key_id {
                    storage::remove_key(queue.storage.as_ref(), &blob_key(&id));
                }
                continue;
            };

            let blob_ref = if record.blob_ref.is_empty() {
                blob_key(&record.id)
            } else {
                record.blob_ref.clone()
            };
            let Some(blob) = storage::read_blob(queue.storage.as_ref(), &blob_ref) else {
                log::warn!("Dropping queue item {}: blob {} is missing", record.id, blob_ref);
                storage::remove_key(queue.storage.as_ref(), &key);
                continue;
            };

            let mut item = record.into_item(blob);
            match item.state {
                QueueState::Uploading => {
                    log::info!("Upload of {} was interrupted, re-queueing", item.id);
                    item.state = QueueState::Pending;
                    item.last_error = None;
                }
                QueueState::Uploaded => {
                    queue.delete_persisted(&item.id);
                    continue;
                }
                QueueState::Pending => item.last_error = None,
                QueueState::Failed => {}
            }
            queue.items.push(item);
        }

        queue.items.sort_by_key(|item| item.created_at);
        for item in &queue.items {
            queue.persist_record(item);
        }

        log::info!("Restored {} queued photos", queue.items.len());
        queue
    }

    /// Inserts `item` as `pending` with no attempts
    pub fn add_to_queue(&mut self, mut item: PhotoQueueItem) {
        item.state = QueueState::Pending;
        item.attempt_count = 0;
        item.last_error = None;
        item.next_attempt_at = None;

        if let Some(existing) = self.items.iter().position(|i| i.id == item.id) {
            log::warn!("Photo {} queued twice, replacing earlier entry", item.id);
            self.items.remove(existing);
        }

        storage::write_blob(self.storage.as_ref(), &blob_key(&item.id), &item.blob);
        self.persist_record(&item);
        log::debug!(
            "Queued photo {} for survey {} ({} bytes)",
            item.id,
            item.survey_id,
            item.blob.len()
        );
        self.items.push(item);
    }

    /// Up to `max_concurrency` due pending items, now marked `uploading`
    pub fn next_batch(&mut self, max_concurrency: usize) -> Vec<PhotoQueueItem> {
        self.take_batch(max_concurrency, Utc::now(), false, &HashSet::new())
    }

    /// Batch selection with explicit clock.
    ///
    /// `ignore_backoff` hands out pending items whose retry delay has not
    /// elapsed yet; `skip` excludes items already attempted by the caller.
    pub fn take_batch(
        &mut self,
        max_concurrency: usize,
        now: DateTime<Utc>,
        ignore_backoff: bool,
        skip: &HashSet<Uuid>,
    ) -> Vec<PhotoQueueItem> {
        let capacity = max_concurrency.saturating_sub(self.uploading_count());
        if capacity == 0 {
            return Vec::new();
        }

        let mut batch = Vec::new();
        for item in self.items.iter_mut() {
            if batch.len() >= capacity {
                break;
            }
            if item.state != QueueState::Pending || skip.contains(&item.id) {
                continue;
            }
            if !ignore_backoff && !item.is_due(now) {
                continue;
            }
            item.state = QueueState::Uploading;
            batch.push(item.clone());
        }

        for item in &batch {
            self.persist_state(&item.id);
        }
        batch
    }

    /// Successful items are not retained
    pub fn mark_uploaded(&mut self, id: &Uuid) -> Option<PhotoQueueItem> {
        let index = self.items.iter().position(|i| i.id == *id)?;
        let mut item = self.items.remove(index);
        item.state = QueueState::Uploaded;
        self.delete_persisted(id);
        log::debug!("Photo {} uploaded, removed from queue", id);
        Some(item)
    }

    /// Drops one item regardless of its state, e.g. when its photo was removed
    pub fn remove(&mut self, id: &Uuid) -> Option<PhotoQueueItem> {
        let index = self.items.iter().position(|i| i.id == *id)?;
        let item = self.items.remove(index);
        self.delete_persisted(id);
        Some(item)
    }

    pub fn mark_failed(&mut self, id: &Uuid, error: &str, kind: FailureKind) -> Option<QueueState> {
        self.mark_failed_at(id, error, kind, Utc::now())
    }

    /// Counts the attempt. Permanent failures and items at the retry ceiling
    /// park as `failed`; the rest return to `pending` behind a backoff delay.
    pub fn mark_failed_at(
        &mut self,
        id: &Uuid,
        error: &str,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Option<QueueState> {
        let policy = self.policy.clone();
        let item = self.items.iter_mut().find(|i| i.id == *id)?;

        item.attempt_count = item.attempt_count.saturating_add(1);

        if kind == FailureKind::Permanent || policy.has_reached_ceiling(item.attempt_count) {
            item.state = QueueState::Failed;
            item.last_error = Some(error.to_string());
            item.next_attempt_at = None;
            log::error!(
                "Photo {} failed after {} attempt(s): {}",
                item.id,
                item.attempt_count,
                error
            );
        } else {
            let delay = policy.jittered_delay(item.attempt_count);
            item.state = QueueState::Pending;
            item.last_error = None;
            item.next_attempt_at = Some(
                now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
            );
            log::warn!(
                "Photo {} upload attempt {}/{} failed: {}. Retrying in {}s",
                item.id,
                item.attempt_count,
                policy.retry_ceiling,
                error,
                delay.as_secs()
            );
        }

        let state = item.state;
        self.persist_state(id);
        Some(state)
    }

    /// Explicit override of the retry ceiling for every parked item
    pub fn retry_failed(&mut self) -> usize {
        let mut retried = Vec::new();
        for item in self.items.iter_mut().filter(|i| i.state == QueueState::Failed) {
            item.state = QueueState::Pending;
            item.attempt_count = 0;
            item.last_error = None;
            item.next_attempt_at = None;
            retried.push(item.id);
        }
        for id in &retried {
            self.persist_state(id);
        }
        if !retried.is_empty() {
            log::info!("Re-queued {} failed photos", retried.len());
        }
        retried.len()
    }

    /// Returns `uploading` items to `pending` without counting an attempt
    pub fn release_uploading(&mut self, ids: &HashSet<Uuid>) -> usize {
        let mut released = Vec::new();
        for item in self
            .items
            .iter_mut()
            .filter(|i| i.state == QueueState::Uploading && ids.contains(&i.id))
        {
            item.state = QueueState::Pending;
            released.push(item.id);
        }
        for id in &released {
            self.persist_state(id);
        }
        released.len()
    }

    /// Discard cascade: drops every item of the survey, in any state
    pub fn remove_survey(&mut self, survey_id: &Uuid) -> usize {
        self.retain_surveys(|sid| sid != survey_id)
    }

    /// Keeps only items whose survey passes `keep`; returns how many were dropped
    pub fn retain_surveys(&mut self, keep: impl Fn(&Uuid) -> bool) -> usize {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| keep(&item.survey_id));
        self.items = kept;
        for item in &dropped {
            self.delete_persisted(&item.id);
        }
        dropped.len()
    }

    /// Whether the survey still has photos pending, uploading or failed
    pub fn has_outstanding(&self, survey_id: &Uuid) -> bool {
        self.items.iter().any(|i| i.survey_id == *survey_id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&PhotoQueueItem> {
        self.items.iter().find(|i| i.id == *id)
    }

    pub fn items(&self) -> &[PhotoQueueItem] {
        &self.items
    }

    pub fn items_for_survey(&self, survey_id: &Uuid) -> Vec<&PhotoQueueItem> {
        self.items
            .iter()
            .filter(|i| i.survey_id == *survey_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.count_in(QueueState::Pending)
    }

    pub fn uploading_count(&self) -> usize {
        self.count_in(QueueState::Uploading)
    }

    pub fn failed_count(&self) -> usize {
        self.count_in(QueueState::Failed)
    }

    /// Sum of queued blob sizes
    pub fn storage_bytes_used(&self) -> u64 {
        self.items.iter().map(PhotoQueueItem::size_bytes).sum()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn count_in(&self, state: QueueState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }

    fn persist_state(&self, id: &Uuid) {
        if let Some(item) = self.get(id) {
            self.persist_record(item);
        }
    }

    fn persist_record(&self, item: &PhotoQueueItem) {
        let record = QueueRecord::from_item(item, blob_key(&item.id));
        storage::write_record(self.storage.as_ref(), &queue_key(&item.id), &record);
    }

    fn delete_persisted(&self, id: &Uuid) {
        storage::remove_key(self.storage.as_ref(), &queue_key(id));
        storage::remove_key(self.storage.as_ref(), &blob_key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn policy(ceiling: u32) -> RetryPolicy {
        RetryPolicy {
            retry_ceiling: ceiling,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }

    fn setup(ceiling: u32) -> (Arc<MemoryStore>, PhotoQueue) {
        let storage = Arc::new(MemoryStore::new());
        let queue = PhotoQueue::new(policy(ceiling), storage.clone());
        (storage, queue)
    }

    fn item(survey: Uuid, bytes: usize) -> PhotoQueueItem {
        PhotoQueueItem::new(Uuid::new_v4(), survey, vec![7; bytes])
    }

    #[test]
    fn test_add_and_counts() {
        let (_, mut queue) = setup(5);
        let survey = Uuid::new_v4();
        let mut dirty = item(survey, 10);
        dirty.attempt_count = 4;
        dirty.state = QueueState::Failed;
        queue.add_to_queue(dirty);
        queue.add_to_queue(item(survey, 20));

        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.items()[0].attempt_count, 0);
        assert_eq!(queue.failed_count(), 0);
        assert_eq!(queue.storage_bytes_used(), 30);
    }

    #[test]
    fn test_batch_respects_concurrency() {
        let (_, mut queue) = setup(5);
        let survey = Uuid::new_v4();
        for _ in 0..5 {
            queue.add_to_queue(item(survey, 1));
        }

        let first = queue.next_batch(3);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|i| i.state == QueueState::Uploading));
        assert_eq!(queue.uploading_count(), 3);

        // Everything allowed is already in flight
        assert!(queue.next_batch(3).is_empty());

        queue.mark_uploaded(&first[0].id);
        let second = queue.next_batch(3);
        assert_eq!(second.len(), 1);
        assert!(!first.iter().any(|i| i.id == second[0].id));
    }

    #[test]
    fn test_failure_goes_back_with_backoff() {
        let (_, mut queue) = setup(5);
        let queued = item(Uuid::new_v4(), 1);
        let id = queued.id;
        queue.add_to_queue(queued);
        let now = Utc::now();

        queue.take_batch(1, now, false, &HashSet::new());
        let state = queue.mark_failed_at(&id, "timeout", FailureKind::Transient, now);
        assert_eq!(state, Some(QueueState::Pending));

        let failed = queue.get(&id).unwrap();
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.last_error, None);
        let due = failed.next_attempt_at.unwrap();
        assert!(due >= now + chrono::Duration::seconds(15));
        assert!(due <= now + chrono::Duration::seconds(30));

        // Not due yet, unless a manual sync overrides the delay
        assert!(queue.take_batch(1, now, false, &HashSet::new()).is_empty());
        assert_eq!(queue.take_batch(1, now, true, &HashSet::new()).len(), 1);
    }

    #[test]
    fn test_retry_ceiling_parks_item() {
        let (_, mut queue) = setup(3);
        let queued = item(Uuid::new_v4(), 1);
        let id = queued.id;
        queue.add_to_queue(queued);

        for attempt in 1..=3 {
            let batch = queue.take_batch(1, Utc::now(), true, &HashSet::new());
            assert_eq!(batch.len(), 1, "attempt {}", attempt);
            queue.mark_failed(&id, "503 Service Unavailable", FailureKind::Transient);
        }

        let parked = queue.get(&id).unwrap();
        assert_eq!(parked.state, QueueState::Failed);
        assert_eq!(parked.last_error.as_deref(), Some("503 Service Unavailable"));
        assert_eq!(queue.failed_count(), 1);

        // Not handed out again, even when ignoring backoff
        assert!(queue.take_batch(1, Utc::now(), true, &HashSet::new()).is_empty());

        assert_eq!(queue.retry_failed(), 1);
        let retried = queue.get(&id).unwrap();
        assert_eq!(retried.state, QueueState::Pending);
        assert_eq!(retried.attempt_count, 0);
        assert_eq!(queue.next_batch(1).len(), 1);
    }

    #[test]
    fn test_permanent_failure_parks_immediately() {
        let (_, mut queue) = setup(5);
        let queued = item(Uuid::new_v4(), 1);
        let id = queued.id;
        queue.add_to_queue(queued);
        queue.next_batch(1);

        let state = queue.mark_failed(&id, "415 Unsupported Media Type", FailureKind::Permanent);
        assert_eq!(state, Some(QueueState::Failed));
        assert_eq!(queue.get(&id).unwrap().attempt_count, 1);
        assert_eq!(
            queue.get(&id).unwrap().last_error.as_deref(),
            Some("415 Unsupported Media Type")
        );
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let (_, mut queue) = setup(5);
        assert!(queue.mark_uploaded(&Uuid::new_v4()).is_none());
        assert!(queue
            .mark_failed(&Uuid::new_v4(), "x", FailureKind::Transient)
            .is_none());
    }

    #[test]
    fn test_discard_cascade() {
        let (storage, mut queue) = setup(1);
        let survey = Uuid::new_v4();
        let other = Uuid::new_v4();
        let a = item(survey, 1);
        let b = item(survey, 1);
        let c = item(survey, 1);
        let failed_id = c.id;
        queue.add_to_queue(a);
        queue.add_to_queue(b);
        queue.add_to_queue(c);
        queue.add_to_queue(item(other, 1));

        // Park one item of the survey
        let in_flight = queue.take_batch(4, Utc::now(), false, &HashSet::new());
        let others: HashSet<Uuid> = in_flight
            .iter()
            .map(|i| i.id)
            .filter(|id| *id != failed_id)
            .collect();
        assert_eq!(queue.release_uploading(&others), 3);
        queue.mark_failed(&failed_id, "boom", FailureKind::Transient);
        assert_eq!(queue.failed_count(), 1);
        assert_eq!(queue.pending_count(), 3);

        assert_eq!(queue.remove_survey(&survey), 3);
        assert!(queue.items_for_survey(&survey).is_empty());
        assert!(!queue.has_outstanding(&survey));
        assert_eq!(queue.len(), 1);

        let keys = storage.keys_with_prefix(QUEUE_PREFIX).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(storage.keys_with_prefix(BLOB_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn test_reload_requeues_interrupted_uploads() {
        let (storage, mut queue) = setup(5);
        let survey = Uuid::new_v4();
        let first = item(survey, 3);
        let second = item(survey, 4);
        let (first_id, second_id) = (first.id, second.id);
        queue.add_to_queue(first);
        queue.add_to_queue(second);
        queue.take_batch(1, Utc::now(), false, &HashSet::new());
        assert_eq!(queue.get(&first_id).unwrap().state, QueueState::Uploading);

        let restored = PhotoQueue::load(policy(5), storage.clone());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.items()[0].id, first_id);
        assert_eq!(restored.items()[1].id, second_id);
        assert_eq!(restored.pending_count(), 2);
        assert_eq!(restored.get(&second_id).unwrap().blob, vec![7; 4]);
    }

    #[test]
    fn test_reload_drops_broken_records() {
        let (storage, mut queue) = setup(5);
        let kept = item(Uuid::new_v4(), 2);
        let orphan = item(Uuid::new_v4(), 2);
        let (kept_id, orphan_id) = (kept.id, orphan.id);
        queue.add_to_queue(kept);
        queue.add_to_queue(orphan);

        storage.remove(&blob_key(&orphan_id)).unwrap();
        let garbage_id = Uuid::new_v4();
        storage.set(&queue_key(&garbage_id), "not json").unwrap();

        let restored = PhotoQueue::load(policy(5), storage.clone());
        let ids: Vec<Uuid> = restored.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![kept_id]);
        assert!(storage.get(&queue_key(&garbage_id)).unwrap().is_none());
        assert!(storage.get(&queue_key(&orphan_id)).unwrap().is_none());
    }

    #[test]
    fn test_reload_adopts_id_from_key() {
        let storage = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let survey = Uuid::new_v4();
        storage::write_blob(storage.as_ref(), &blob_key(&id), &[9, 9, 9]);
        storage
            .set(
                &queue_key(&id),
                &format!(r#"{{"surveyId": "{}", "state": "failed", "attemptCount": 5}}"#, survey),
            )
            .unwrap();

        let restored = PhotoQueue::load(policy(5), storage.clone());
        let item = restored.get(&id).unwrap();
        assert_eq!(item.survey_id, survey);
        assert_eq!(item.state, QueueState::Failed);
        assert_eq!(item.attempt_count, 5);
        assert_eq!(item.blob, vec![9, 9, 9]);

        let record: QueueRecord = storage::read_record(storage.as_ref(), &queue_key(&id)).unwrap();
        assert_eq!(record.id, id);
    }
}
