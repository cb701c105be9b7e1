pub mod backoff;
pub mod capture;
pub mod connectivity;
pub mod draft_registry;
pub mod draft_store;
pub mod form_merge;
pub mod photo_queue;
pub mod sync_orchestrator;
pub mod sync_paths;
pub mod transport;
pub mod webdav_transport;

pub use backoff::RetryPolicy;
pub use capture::{
    CaptureError, CaptureMetadata, CaptureSource, CaptureState, LocationProvider, NoLocation,
    PhotoCapturePipeline,
};
pub use connectivity::{ConnectivityHandle, ReachabilityProbe};
pub use draft_registry::DraftRegistry;
pub use draft_store::SurveyDraftStore;
pub use photo_queue::PhotoQueue;
pub use sync_orchestrator::{SyncLogEntry, SyncOrchestrator, SyncReport};
pub use transport::{
    FailureKind, PhotoUpload, RemoteRef, SurveySubmission, SyncTransport, TransportError,
    UploadedPhoto,
};
pub use webdav_transport::WebDavTransport;
