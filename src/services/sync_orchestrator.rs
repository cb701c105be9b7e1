//! Drains the photo queue, submits completed surveys and derives the
//! aggregate sync status observers see.
//!
//! Lock order where more than one is held: drafts, then queue. The engine
//! state lock is never held together with either. No lock is held across an
//! await point.

use crate::config::{EngineConfig, SyncConfig};
use crate::models::{StatusInputs, SurveyDraft, SyncStatus, SyncStatusSnapshot};
use crate::services::draft_registry::DraftRegistry;
use crate::services::photo_queue::PhotoQueue;
use crate::services::transport::{
    PhotoUpload, RemoteRef, SurveySubmission, SyncTransport, TransportError, UploadedPhoto,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Maximum number of cycles kept in the session log
const SYNC_LOG_CAPACITY: usize = 500;

/// Outcome of one drain-and-submit cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub photos_uploaded: usize,
    pub photos_failed: usize,
    pub surveys_submitted: usize,
    pub surveys_failed: usize,
}

/// In-memory session log entry (volatile, lost on restart)
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub ts_ms: i64,
    pub report: SyncReport,
}

#[derive(Debug, Default)]
struct EngineState {
    is_online: bool,
    in_flight: bool,
    /// Surveys whose submission failed, parked until `retry_failed`
    failed_submissions: BTreeMap<Uuid, String>,
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    log: VecDeque<SyncLogEntry>,
    next_sync_at: Option<DateTime<Utc>>,
}

pub struct SyncOrchestrator<T: SyncTransport> {
    drafts: Arc<Mutex<DraftRegistry>>,
    queue: Arc<Mutex<PhotoQueue>>,
    transport: Arc<T>,
    config: SyncConfig,
    max_concurrency: usize,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<SyncStatusSnapshot>,
    wake: Notify,
}

/// Clears `in_flight` when a cycle ends, however it ends
struct CycleGuard<'a, T: SyncTransport> {
    orchestrator: &'a SyncOrchestrator<T>,
}

impl<T: SyncTransport> Drop for CycleGuard<'_, T> {
    fn drop(&mut self) {
        self.orchestrator.lock_state().in_flight = false;
        self.orchestrator.publish();
    }
}

impl<T: SyncTransport> SyncOrchestrator<T> {
    pub fn new(
        drafts: Arc<Mutex<DraftRegistry>>,
        queue: Arc<Mutex<PhotoQueue>>,
        transport: Arc<T>,
        config: &EngineConfig,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(SyncStatusSnapshot::offline());
        let orchestrator = Self {
            drafts,
            queue,
            transport,
            config: config.sync.clone(),
            max_concurrency: config.queue.max_concurrency.max(1),
            state: Mutex::new(EngineState::default()),
            status_tx,
            wake: Notify::new(),
        };
        orchestrator.publish();
        orchestrator
    }

    pub fn drafts(&self) -> &Arc<Mutex<DraftRegistry>> {
        &self.drafts
    }

    pub fn queue(&self) -> &Arc<Mutex<PhotoQueue>> {
        &self.queue
    }

    // Status

    pub fn set_online(&self, online: bool) {
        let changed = {
            let mut state = self.lock_state();
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        };
        if changed {
            log::info!("Sync engine is now {}", if online { "online" } else { "offline" });
            self.publish();
        }
    }

    pub fn is_online(&self) -> bool {
        self.lock_state().is_online
    }

    /// Fresh snapshot of the aggregate status
    pub fn status(&self) -> SyncStatusSnapshot {
        let completed = self.lock_drafts().completed_ids();

        let (is_online, in_flight, parked, last_synced_at, last_error) = {
            let state = self.lock_state();
            (
                state.is_online,
                state.in_flight,
                state.failed_submissions.keys().copied().collect::<HashSet<_>>(),
                state.last_synced_at,
                state.last_error.clone(),
            )
        };

        let queue = self.lock_queue();
        let awaiting_submission = completed
            .iter()
            .filter(|id| !parked.contains(*id) && !queue.has_outstanding(id))
            .count();

        let inputs = StatusInputs {
            is_online,
            in_flight,
            pending_count: queue.pending_count() + awaiting_submission,
            uploading_count: queue.uploading_count(),
            failed_count: queue.failed_count() + parked.len(),
        };
        let storage_bytes_used = queue.storage_bytes_used();
        drop(queue);

        let budget = self.config.storage_budget_bytes;
        let storage_percent_used = if budget == 0 {
            0.0
        } else {
            ((storage_bytes_used as f64 / budget as f64) * 100.0).min(100.0) as f32
        };
        let storage_nearly_full = budget > 0
            && storage_bytes_used as f64 >= budget as f64 * self.config.storage_warning_ratio as f64;

        SyncStatusSnapshot {
            status: SyncStatus::derive(&inputs),
            is_online,
            pending_count: inputs.pending_count,
            uploading_count: inputs.uploading_count,
            failed_count: inputs.failed_count,
            storage_bytes_used,
            storage_percent_used,
            storage_nearly_full,
            last_synced_at,
            last_error,
        }
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Recomputes the snapshot and hands it to subscribers
    pub fn publish(&self) {
        let snapshot = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    // Triggers

    /// Runs a cycle right away, ignoring scheduled backoff.
    ///
    /// Returns `None` when offline or when a cycle is already running.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.run_cycle(true).await
    }

    /// Fire-and-forget form of `sync_now`, served by `run`
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Re-queues parked photos and surveys, then syncs
    pub async fn retry_failed(&self) -> Option<SyncReport> {
        let photos = self.lock_queue().retry_failed();
        let surveys = {
            let mut state = self.lock_state();
            let count = state.failed_submissions.len();
            state.failed_submissions.clear();
            state.last_error = None;
            count
        };
        log::info!(
            "Retrying {} failed photos and {} failed submissions",
            photos,
            surveys
        );
        self.publish();
        self.sync_now().await
    }

    // Survey lifecycle

    /// Discards a survey: its draft, display copies and every queue item
    pub fn discard_survey(&self, survey_id: &Uuid) -> bool {
        let discarded = self.lock_drafts().discard(survey_id);
        let dropped = self.lock_queue().remove_survey(survey_id);
        self.lock_state().failed_submissions.remove(survey_id);
        if dropped > 0 {
            log::info!("Dropped {} queued photos of survey {}", dropped, survey_id);
        }
        self.publish();
        discarded || dropped > 0
    }

    /// Removes one photo from its draft and from the queue
    pub fn remove_photo(&self, survey_id: &Uuid, photo_id: &Uuid) -> bool {
        let removed = self
            .lock_drafts()
            .get_mut(survey_id)
            .and_then(|draft| draft.remove_photo(photo_id))
            .is_some();
        let dequeued = self.lock_queue().remove(photo_id).is_some();
        self.publish();
        removed || dequeued
    }

    /// Drops queue items and parked submissions whose survey no longer
    /// exists, e.g. after a crash in the middle of a discard
    pub fn reconcile(&self) -> usize {
        let known: HashSet<Uuid> = self.lock_drafts().ids().into_iter().collect();
        let dropped = self.lock_queue().retain_surveys(|sid| known.contains(sid));
        self.lock_state()
            .failed_submissions
            .retain(|id, _| known.contains(id));
        if dropped > 0 {
            log::warn!("Dropped {} orphaned queue items", dropped);
        }
        self.publish();
        dropped
    }

    // Diagnostics

    pub fn sync_log(&self) -> Vec<SyncLogEntry> {
        self.lock_state().log.iter().cloned().collect()
    }

    /// Seconds until the next periodic cycle; `None` while offline or unscheduled
    pub fn next_sync_eta_seconds(&self) -> Option<u64> {
        let state = self.lock_state();
        if !state.is_online {
            return None;
        }
        let target = state.next_sync_at?;
        let remaining = (target - Utc::now()).num_seconds();
        Some(remaining.max(0) as u64)
    }

    // Background loop

    /// Drains on every transition to online, every `interval_secs` while
    /// online and whenever `request_sync` was called. Returns when the
    /// connectivity source closes.
    pub async fn run(&self, mut connectivity: watch::Receiver<bool>) {
        let initial = *connectivity.borrow_and_update();
        self.set_online(initial);

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "Starting sync loop with {} second interval",
            self.config.interval_secs
        );

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Let a flapping signal settle
                    tokio::time::sleep(self.config.debounce()).await;
                    let online = *connectivity.borrow_and_update();
                    let was_online = self.is_online();
                    self.set_online(online);
                    if online && !was_online {
                        self.log_cycle_result(self.run_cycle(false).await);
                    }
                }
                _ = ticker.tick() => {
                    if self.is_online() {
                        self.log_cycle_result(self.run_cycle(false).await);
                    }
                    self.lock_state().next_sync_at =
                        Some(Utc::now() + chrono::Duration::seconds(self.config.interval_secs as i64));
                }
                _ = self.wake.notified() => {
                    self.log_cycle_result(self.run_cycle(true).await);
                }
            }
        }

        log::info!("Connectivity source closed, sync loop stopped");
    }

    fn log_cycle_result(&self, report: Option<SyncReport>) {
        match report {
            Some(report) => log::info!("Sync cycle completed: {:?}", report),
            None => log::debug!("Sync cycle skipped"),
        }
    }

    // Cycle

    async fn run_cycle(&self, ignore_backoff: bool) -> Option<SyncReport> {
        {
            let mut state = self.lock_state();
            if !state.is_online {
                log::debug!("Offline, not syncing");
                return None;
            }
            if state.in_flight {
                log::debug!("Sync already in progress");
                return None;
            }
            state.in_flight = true;
        }
        let _guard = CycleGuard { orchestrator: self };
        self.publish();

        let mut report = SyncReport::default();
        self.drain_queue(ignore_backoff, &mut report).await;
        self.submit_completed(&mut report).await;

        {
            let mut state = self.lock_state();
            let now = Utc::now();
            if report.photos_failed == 0 && report.surveys_failed == 0 {
                state.last_synced_at = Some(now);
            }
            state.log.push_back(SyncLogEntry {
                ts_ms: now.timestamp_millis(),
                report: report.clone(),
            });
            while state.log.len() > SYNC_LOG_CAPACITY {
                state.log.pop_front();
            }
        }
        if report.photos_failed == 0 && report.surveys_failed == 0 {
            let nothing_parked = {
                let queue_failed = self.lock_queue().failed_count();
                queue_failed == 0 && self.lock_state().failed_submissions.is_empty()
            };
            if nothing_parked {
                self.lock_state().last_error = None;
            }
        }

        Some(report)
    }

    /// Uploads queued photos over a sliding window. The queue decides how
    /// many are in flight; every item is attempted at most once per cycle.
    async fn drain_queue(&self, ignore_backoff: bool, report: &mut SyncReport) {
        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut in_flight: HashSet<Uuid> = HashSet::new();
        let mut join_set: JoinSet<(Uuid, Result<RemoteRef, TransportError>)> = JoinSet::new();

        loop {
            if self.is_online() {
                let batch = self.lock_queue().take_batch(
                    self.max_concurrency,
                    Utc::now(),
                    ignore_backoff,
                    &attempted,
                );
                if !batch.is_empty() {
                    log::debug!("Uploading batch of {} photos", batch.len());
                }

                for item in batch {
                    attempted.insert(item.id);
                    let Some(upload) = self.build_upload(item.survey_id, item.id, item.blob) else {
                        log::warn!(
                            "Photo {} of survey {} has no draft entry, dropping it",
                            item.id,
                            item.survey_id
                        );
                        self.lock_queue().remove(&item.id);
                        continue;
                    };
                    in_flight.insert(item.id);
                    let transport = self.transport.clone();
                    let photo_id = item.id;
                    join_set.spawn(async move { (photo_id, transport.upload_photo(upload).await) });
                }
                self.publish();
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((photo_id, result)) => {
                    in_flight.remove(&photo_id);
                    self.apply_upload_result(photo_id, result, report);
                }
                Err(e) => log::error!("Upload task failed: {}", e),
            }
            self.publish();
        }

        // Tasks that died never reported back
        if !in_flight.is_empty() {
            let released = self.lock_queue().release_uploading(&in_flight);
            log::warn!("Released {} interrupted uploads", released);
        }
    }

    fn build_upload(&self, survey_id: Uuid, photo_id: Uuid, bytes: Vec<u8>) -> Option<PhotoUpload> {
        let drafts = self.lock_drafts();
        let photo = drafts.get(&survey_id)?.photo(&photo_id)?;
        Some(PhotoUpload {
            survey_id,
            photo_id,
            bytes,
            caption: photo.caption.clone(),
            location: photo.location.clone(),
            geo: photo.geo,
            captured_at: Some(photo.captured_at),
        })
    }

    fn apply_upload_result(
        &self,
        photo_id: Uuid,
        result: Result<RemoteRef, TransportError>,
        report: &mut SyncReport,
    ) {
        match result {
            Ok(remote_ref) => {
                let uploaded = self.lock_queue().mark_uploaded(&photo_id);
                if let Some(item) = uploaded {
                    if let Some(draft) = self.lock_drafts().get_mut(&item.survey_id) {
                        draft.set_photo_remote_ref(&photo_id, remote_ref);
                    }
                    report.photos_uploaded += 1;
                }
            }
            Err(e) => {
                log::error!("Upload of photo {} failed: {}", photo_id, e);
                self.lock_queue().mark_failed(&photo_id, &e.message, e.kind);
                self.lock_state().last_error = Some(e.to_string());
                report.photos_failed += 1;
            }
        }
    }

    /// Submits every complete survey without outstanding photos, one at a time
    async fn submit_completed(&self, report: &mut SyncReport) {
        let parked: HashSet<Uuid> = self
            .lock_state()
            .failed_submissions
            .keys()
            .copied()
            .collect();

        let submissions = {
            let drafts = self.lock_drafts();
            let queue = self.lock_queue();
            let ready: Vec<(SurveySubmission, SurveyDraft)> = drafts
                .completed_ids()
                .into_iter()
                .filter(|id| !parked.contains(id) && !queue.has_outstanding(id))
                .filter_map(|id| drafts.get(&id))
                .map(|draft| {
                    let photos = draft
                        .photos()
                        .iter()
                        .filter_map(|photo| match &photo.remote_ref {
                            Some(remote_ref) => Some(UploadedPhoto {
                                photo_id: photo.id,
                                remote_ref: remote_ref.clone(),
                                caption: photo.caption.clone(),
                                location: photo.location.clone(),
                                geo: photo.geo,
                            }),
                            None => {
                                log::warn!(
                                    "Photo {} of survey {} was never uploaded, submitting without it",
                                    photo.id,
                                    draft.id()
                                );
                                None
                            }
                        })
                        .collect();
                    let submission = SurveySubmission {
                        survey_id: draft.id(),
                        form_data: draft.form_data().clone(),
                        photos,
                        submitted_at: Utc::now(),
                    };
                    (submission, draft.draft().clone())
                })
                .collect();
            ready
        };

        for (submission, submitted) in submissions {
            if !self.is_online() {
                break;
            }
            let survey_id = submission.survey_id;
            log::debug!("Submitting survey {}", survey_id);

            match self.transport.submit_survey(submission).await {
                Ok(()) => {
                    report.surveys_submitted += 1;
                    if self.clear_submitted(&submitted) {
                        log::info!("Survey {} submitted and cleared locally", survey_id);
                    } else {
                        log::warn!(
                            "Survey {} changed while it was being submitted, keeping it for another pass",
                            survey_id
                        );
                        self.wake.notify_one();
                    }
                }
                Err(e) => {
                    log::error!("Submission of survey {} failed: {}", survey_id, e);
                    let mut state = self.lock_state();
                    state.failed_submissions.insert(survey_id, e.message.clone());
                    state.last_error = Some(e.to_string());
                    report.surveys_failed += 1;
                }
            }
            self.publish();
        }
    }

    /// Discards a submitted survey unless it gained photos, uploads or edits
    /// since `submitted` was taken. Returns whether it was discarded.
    fn clear_submitted(&self, submitted: &SurveyDraft) -> bool {
        let mut drafts = self.lock_drafts();
        let mut queue = self.lock_queue();
        let Some(current) = drafts.get(&submitted.id) else {
            // Discarded locally while in flight
            return true;
        };
        let unchanged = current.photos() == submitted.photos.as_slice()
            && *current.form_data() == submitted.form_data;
        if !unchanged || queue.has_outstanding(&submitted.id) {
            return false;
        }
        drafts.discard(&submitted.id);
        queue.remove_survey(&submitted.id);
        true
    }

    fn lock_drafts(&self) -> MutexGuard<'_, DraftRegistry> {
        self.drafts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_queue(&self) -> MutexGuard<'_, PhotoQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
