use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Answer tree of a survey: string keys to JSON nodes of any depth
pub type FormData = serde_json::Map<String, serde_json::Value>;

/// One in-progress survey, persisted as a single record.
///
/// Field names are camelCase on disk and every field defaults, so records
/// written by older or newer app versions still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveyDraft {
    pub id: Uuid,
    pub current_step: u32,
    pub form_data: FormData,
    /// Display order
    pub photos: Vec<PhotoRef>,
    /// Dot-separated field path to message
    pub validation_errors: BTreeMap<String, String>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl SurveyDraft {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            ..Self::default()
        }
    }

    pub fn photo(&self, id: &Uuid) -> Option<&PhotoRef> {
        self.photos.iter().find(|p| p.id == *id)
    }

    pub fn photo_mut(&mut self, id: &Uuid) -> Option<&mut PhotoRef> {
        self.photos.iter_mut().find(|p| p.id == *id)
    }
}

/// Device geolocation attached to a photo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

/// A photo as the draft (and its UI) knows it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhotoRef {
    pub id: Uuid,
    /// Storage key of the on-device display copy
    pub local_uri: String,
    pub caption: Option<String>,
    /// Free-text on-site location tag (e.g. "north wall")
    pub location: Option<String>,
    pub geo: Option<GeoPoint>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// Server reference, set once the upload succeeded
    pub remote_ref: Option<String>,
}

/// Input of `SurveyDraftStore::add_photo`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPhoto {
    /// Suggested id; replaced when missing or already taken in the draft
    pub id: Option<Uuid>,
    pub local_uri: String,
    pub caption: Option<String>,
    pub location: Option<String>,
    pub geo: Option<GeoPoint>,
    pub width: u32,
    pub height: u32,
}

impl NewPhoto {
    pub fn new(local_uri: impl Into<String>) -> Self {
        Self {
            local_uri: local_uri.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Shallow patch of a photo's mutable metadata.
///
/// The outer `Option` says whether the field is part of the patch, the inner
/// one is the new value (so `Some(None)` clears it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoPatch {
    pub caption: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub geo: Option<Option<GeoPoint>>,
}

impl PhotoPatch {
    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(Some(caption.into()));
        self
    }

    pub fn clear_caption(mut self) -> Self {
        self.caption = Some(None);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(Some(location.into()));
        self
    }

    pub fn clear_location(mut self) -> Self {
        self.location = Some(None);
        self
    }

    pub fn geo(mut self, geo: Option<GeoPoint>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn apply(&self, photo: &mut PhotoRef) {
        if let Some(caption) = &self.caption {
            photo.caption = caption.clone();
        }
        if let Some(location) = &self.location {
            photo.location = location.clone();
        }
        if let Some(geo) = self.geo {
            photo.geo = geo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_record_tolerates_missing_and_unknown_fields() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"id":"{}","currentStep":2,"futureField":{{"x":1}},"photos":[{{"id":"{}","caption":"gate"}}]}}"#,
            id,
            Uuid::new_v4()
        );
        let draft: SurveyDraft = serde_json::from_str(&json).unwrap();

        assert_eq!(draft.id, id);
        assert_eq!(draft.current_step, 2);
        assert!(draft.form_data.is_empty());
        assert!(!draft.is_complete);
        assert_eq!(draft.photos[0].caption.as_deref(), Some("gate"));
        assert_eq!(draft.photos[0].remote_ref, None);
    }

    #[test]
    fn test_patch_is_shallow() {
        let mut photo = PhotoRef {
            caption: Some("old".into()),
            location: Some("roof".into()),
            ..PhotoRef::default()
        };

        PhotoPatch::default().caption("new").apply(&mut photo);
        assert_eq!(photo.caption.as_deref(), Some("new"));
        assert_eq!(photo.location.as_deref(), Some("roof"));

        PhotoPatch::default().clear_location().apply(&mut photo);
        assert_eq!(photo.location, None);
        assert_eq!(photo.caption.as_deref(), Some("new"));
    }
}
