//! Photo capture: raw image in, `PhotoRef` in the draft plus a queued upload out.

use crate::config::CaptureConfig;
use crate::models::{GeoPoint, NewPhoto, PhotoQueueItem};
use crate::services::draft_registry::DraftRegistry;
use crate::services::draft_store::local_photo_key;
use crate::services::photo_queue::PhotoQueue;
use crate::storage::{self, KeyValueStore};
use photo_pipeline::PipelineError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Error of one capture attempt. Nothing is committed when one is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Input is not an image
    Rejected(String),
    /// Image could not be decoded
    Decode(String),
    /// Re-encoding the upload blob failed
    Encode(String),
    /// Worker thread died before finishing
    Interrupted(String),
    /// The target survey does not exist (anymore)
    UnknownSurvey(Uuid),
}

impl CaptureError {
    /// Whether re-triggering the capture may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::Decode(_) | CaptureError::Encode(_) | CaptureError::Interrupted(_)
        )
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Rejected(msg) => write!(f, "Unsupported input: {}", msg),
            CaptureError::Decode(msg) => write!(f, "Could not read photo: {}", msg),
            CaptureError::Encode(msg) => write!(f, "Could not compress photo: {}", msg),
            CaptureError::Interrupted(msg) => write!(f, "Photo processing interrupted: {}", msg),
            CaptureError::UnknownSurvey(id) => write!(f, "Survey {} not found", id),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<PipelineError> for CaptureError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::UnsupportedInput(msg) => CaptureError::Rejected(msg),
            PipelineError::Decode(msg) => CaptureError::Decode(msg),
            PipelineError::Encode(msg) => CaptureError::Encode(msg),
            PipelineError::Processing(msg) => CaptureError::Interrupted(msg),
        }
    }
}

/// Observable state of the capture input
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CaptureState {
    #[default]
    Idle,
    Processing,
    Failed { message: String, retryable: bool },
}

/// Device geolocation
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> impl Future<Output = Result<GeoPoint, String>> + Send;
}

/// Provider for devices without positioning
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    async fn current_location(&self) -> Result<GeoPoint, String> {
        Err("no location provider".to_string())
    }
}

/// A raw camera capture or selected file
#[derive(Debug, Clone)]
pub struct CaptureSource {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    pub file_name: Option<String>,
}

impl CaptureSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: None,
            file_name: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// User-entered metadata known at capture time
#[derive(Debug, Clone, Default)]
pub struct CaptureMetadata {
    pub caption: Option<String>,
    pub location: Option<String>,
}

pub struct PhotoCapturePipeline<L: LocationProvider = NoLocation> {
    drafts: Arc<Mutex<DraftRegistry>>,
    queue: Arc<Mutex<PhotoQueue>>,
    storage: Arc<dyn KeyValueStore>,
    config: CaptureConfig,
    locator: L,
    state: Mutex<CaptureState>,
}

impl<L: LocationProvider> PhotoCapturePipeline<L> {
    pub fn new(
        drafts: Arc<Mutex<DraftRegistry>>,
        queue: Arc<Mutex<PhotoQueue>>,
        storage: Arc<dyn KeyValueStore>,
        config: CaptureConfig,
        locator: L,
    ) -> Self {
        Self {
            drafts,
            queue,
            storage,
            config,
            locator,
            state: Mutex::new(CaptureState::Idle),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Dismisses a failure so the input is ready again
    pub fn reset(&self) {
        self.set_state(CaptureState::Idle);
    }

    /// Runs one capture attempt for `survey_id` and returns the photo id.
    ///
    /// The draft gets its `PhotoRef` and the queue its pending item in one
    /// step after processing succeeded. Geolocation failures only drop the
    /// location.
    pub async fn capture(
        &self,
        survey_id: Uuid,
        source: CaptureSource,
        meta: CaptureMetadata,
    ) -> Result<Uuid, CaptureError> {
        self.set_state(CaptureState::Processing);

        let result = self.run_capture(survey_id, source, meta).await;
        match &result {
            Ok(photo_id) => {
                log::info!("Captured photo {} for survey {}", photo_id, survey_id);
                self.set_state(CaptureState::Idle);
            }
            Err(e) => {
                log::warn!("Capture for survey {} failed: {}", survey_id, e);
                self.set_state(CaptureState::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }
        result
    }

    async fn run_capture(
        &self,
        survey_id: Uuid,
        source: CaptureSource,
        meta: CaptureMetadata,
    ) -> Result<Uuid, CaptureError> {
        if !photo_pipeline::accepts(source.mime.as_deref(), source.file_name.as_deref()) {
            return Err(CaptureError::Rejected(
                source
                    .mime
                    .or(source.file_name)
                    .unwrap_or_else(|| "unknown input".to_string()),
            ));
        }
        if !self.survey_exists(&survey_id) {
            return Err(CaptureError::UnknownSurvey(survey_id));
        }

        let (processed, geo) = tokio::join!(
            photo_pipeline::process_image_blocking(source.bytes, self.config.pipeline()),
            self.locate()
        );
        let processed = processed?;
        log::debug!(
            "Processed photo {}x{} -> {}x{}, {} bytes",
            processed.original_width,
            processed.original_height,
            processed.width,
            processed.height,
            processed.blob.len()
        );

        // Draft and queue are updated under both locks, so no caller sees
        // the photo in one but not the other.
        let mut drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
        let draft = drafts
            .get_mut(&survey_id)
            .ok_or(CaptureError::UnknownSurvey(survey_id))?;

        let suggested = Uuid::new_v4();
        let photo = NewPhoto {
            id: Some(suggested),
            local_uri: local_photo_key(&suggested),
            caption: meta.caption,
            location: meta.location,
            geo,
            width: processed.width,
            height: processed.height,
        };
        let photo_id = draft.add_photo(photo);
        storage::write_blob(
            self.storage.as_ref(),
            &local_photo_key(&photo_id),
            &processed.thumbnail,
        );

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.add_to_queue(PhotoQueueItem::new(photo_id, survey_id, processed.blob));

        Ok(photo_id)
    }

    fn survey_exists(&self, survey_id: &Uuid) -> bool {
        self.drafts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(survey_id)
    }

    async fn locate(&self) -> Option<GeoPoint> {
        let timeout = self.config.location_timeout();
        match tokio::time::timeout(timeout, self.locator.current_location()).await {
            Ok(Ok(point)) => Some(point),
            Ok(Err(e)) => {
                log::debug!("No location for photo: {}", e);
                None
            }
            Err(_) => {
                log::debug!("Location lookup timed out after {:?}", timeout);
                None
            }
        }
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
