pub mod queue_item;
pub mod survey_draft;
pub mod survey_schema;
pub mod sync_status;

pub use queue_item::{PhotoQueueItem, QueueRecord, QueueState};
pub use survey_draft::{FormData, GeoPoint, NewPhoto, PhotoPatch, PhotoRef, SurveyDraft};
pub use survey_schema::{FieldRequirement, StepSchema, SurveySchema};
pub use sync_status::{StatusInputs, SyncStatus, SyncStatusSnapshot};
