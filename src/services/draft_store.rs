//! Survey draft store: the in-progress state of one survey wizard.
//!
//! All operations are total. Missing ids, negative steps and corrupted
//! storage degrade to safe defaults instead of returning errors; the only
//! success signals are the boolean validation queries.

use crate::models::{FormData, NewPhoto, PhotoPatch, PhotoRef, SurveyDraft, SurveySchema};
use crate::services::form_merge::{deep_merge, is_answered, lookup};
use crate::storage::{self, KeyValueStore, DRAFT_PREFIX, LOCAL_PHOTO_PREFIX};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub fn draft_key(id: &Uuid) -> String {
    format!("{}{}", DRAFT_PREFIX, id)
}

pub fn local_photo_key(id: &Uuid) -> String {
    format!("{}{}", LOCAL_PHOTO_PREFIX, id)
}

pub struct SurveyDraftStore {
    draft: SurveyDraft,
    schema: Arc<SurveySchema>,
    storage: Arc<dyn KeyValueStore>,
}

impl SurveyDraftStore {
    /// A fresh draft in its initial state. Nothing is persisted until the
    /// first change.
    pub fn new(id: Uuid, schema: Arc<SurveySchema>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            draft: SurveyDraft::new(id),
            schema,
            storage,
        }
    }

    pub fn create(schema: Arc<SurveySchema>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(Uuid::new_v4(), schema, storage)
    }

    /// Restores the draft persisted under `id`, or the initial state
    pub fn load(id: Uuid, schema: Arc<SurveySchema>, storage: Arc<dyn KeyValueStore>) -> Self {
        let mut store = Self::new(id, schema, storage);
        store.load_from_storage();
        store
    }

    pub fn id(&self) -> Uuid {
        self.draft.id
    }

    pub fn draft(&self) -> &SurveyDraft {
        &self.draft
    }

    pub fn current_step(&self) -> u32 {
        self.draft.current_step
    }

    pub fn form_data(&self) -> &FormData {
        &self.draft.form_data
    }

    pub fn photos(&self) -> &[PhotoRef] {
        &self.draft.photos
    }

    pub fn photo(&self, id: &Uuid) -> Option<&PhotoRef> {
        self.draft.photo(id)
    }

    pub fn validation_errors(&self) -> &BTreeMap<String, String> {
        &self.draft.validation_errors
    }

    pub fn is_complete(&self) -> bool {
        self.draft.is_complete
    }

    pub fn schema(&self) -> &SurveySchema {
        &self.schema
    }

    // Step navigation

    /// No upper bound; the wizard length is the caller's concern
    pub fn next_step(&mut self) {
        self.draft.current_step = self.draft.current_step.saturating_add(1);
        self.save_to_storage();
    }

    pub fn prev_step(&mut self) {
        if self.draft.current_step == 0 {
            return;
        }
        self.draft.current_step -= 1;
        self.save_to_storage();
    }

    pub fn set_step(&mut self, step: i64) {
        let step = step.clamp(0, u32::MAX as i64) as u32;
        if step != self.draft.current_step {
            self.draft.current_step = step;
            self.save_to_storage();
        }
    }

    // Form data

    pub fn update_form_data(&mut self, partial: &FormData) {
        if partial.is_empty() {
            return;
        }
        deep_merge(&mut self.draft.form_data, partial);
        self.save_to_storage();
    }

    /// Leaves photos, step and validation errors alone
    pub fn clear_form_data(&mut self) {
        self.draft.form_data = FormData::new();
        self.save_to_storage();
    }

    // Photos

    /// Appends a photo and returns its id.
    ///
    /// A suggested id is kept unless another photo in this draft already has it.
    pub fn add_photo(&mut self, photo: NewPhoto) -> Uuid {
        let id = match photo.id {
            Some(id) if self.draft.photo(&id).is_none() => id,
            Some(taken) => {
                log::warn!("Photo id {} already in draft {}, assigning new id", taken, self.id());
                Uuid::new_v4()
            }
            None => Uuid::new_v4(),
        };

        self.draft.photos.push(PhotoRef {
            id,
            local_uri: photo.local_uri,
            caption: photo.caption,
            location: photo.location,
            geo: photo.geo,
            width: photo.width,
            height: photo.height,
            captured_at: Utc::now(),
            remote_ref: None,
        });
        self.save_to_storage();
        id
    }

    /// Removes the photo and its display copy; absent ids are ignored
    pub fn remove_photo(&mut self, id: &Uuid) -> Option<PhotoRef> {
        let index = self.draft.photos.iter().position(|p| p.id == *id)?;
        let removed = self.draft.photos.remove(index);
        storage::remove_key(self.storage.as_ref(), &local_photo_key(id));
        self.save_to_storage();
        Some(removed)
    }

    pub fn update_photo(&mut self, id: &Uuid, patch: &PhotoPatch) {
        if let Some(photo) = self.draft.photo_mut(id) {
            patch.apply(photo);
            self.save_to_storage();
        }
    }

    pub fn clear_photos(&mut self) {
        if self.draft.photos.is_empty() {
            return;
        }
        self.remove_local_copies();
        self.draft.photos.clear();
        self.save_to_storage();
    }

    /// Records the server reference of an uploaded photo
    pub fn set_photo_remote_ref(&mut self, id: &Uuid, remote_ref: impl Into<String>) {
        if let Some(photo) = self.draft.photo_mut(id) {
            photo.remote_ref = Some(remote_ref.into());
            self.save_to_storage();
        }
    }

    // Validation

    pub fn set_validation_errors(&mut self, errors: BTreeMap<String, String>) {
        self.draft.validation_errors = errors;
        self.save_to_storage();
    }

    pub fn clear_validation_errors(&mut self) {
        if self.draft.validation_errors.is_empty() {
            return;
        }
        self.draft.validation_errors.clear();
        self.save_to_storage();
    }

    /// Field path to message for every unanswered required field of `step`
    pub fn step_errors(&self, step: usize) -> BTreeMap<String, String> {
        let Some(schema) = self.schema.step(step) else {
            return BTreeMap::new();
        };

        schema
            .required
            .iter()
            .filter(|req| {
                !lookup(&self.draft.form_data, &req.path)
                    .map(is_answered)
                    .unwrap_or(false)
            })
            .map(|req| (req.path.clone(), req.message()))
            .collect()
    }

    /// Pure check; does not touch the stored validation errors
    pub fn validate_step(&self, step: usize) -> bool {
        self.step_errors(step).is_empty()
    }

    pub fn can_complete(&self) -> bool {
        self.draft.validation_errors.is_empty()
            && (0..self.schema.step_count()).all(|step| self.validate_step(step))
    }

    /// Unconditional; callers check `can_complete` first
    pub fn mark_complete(&mut self) {
        if !self.draft.is_complete {
            self.draft.is_complete = true;
            self.save_to_storage();
        }
    }

    /// Back to step 0, no answers, no photos, no errors, not complete
    pub fn reset(&mut self) {
        self.remove_local_copies();
        self.draft = SurveyDraft::new(self.id());
        self.save_to_storage();
    }

    // Persistence

    pub fn storage_key(&self) -> String {
        draft_key(&self.id())
    }

    /// Fire-and-forget: failures are logged, in-memory state is authoritative
    pub fn save_to_storage(&self) {
        storage::write_record(self.storage.as_ref(), &self.storage_key(), &self.draft);
    }

    /// Replaces the in-memory state with the persisted record.
    ///
    /// Absent, malformed or mismatching records yield the initial state.
    pub fn load_from_storage(&mut self) {
        let id = self.id();
        self.draft = match storage::read_record::<SurveyDraft>(self.storage.as_ref(), &draft_key(&id)) {
            Some(draft) if draft.id == id => draft,
            // Records without an id take the one from their key
            Some(mut draft) if draft.id.is_nil() => {
                draft.id = id;
                draft
            }
            Some(draft) => {
                log::warn!(
                    "Draft record under {} carries id {}, starting fresh",
                    draft_key(&id),
                    draft.id
                );
                SurveyDraft::new(id)
            }
            None => SurveyDraft::new(id),
        };
    }

    /// Deletes the persisted record and all display copies
    pub(crate) fn delete_from_storage(&self) {
        self.remove_local_copies();
        storage::remove_key(self.storage.as_ref(), &self.storage_key());
    }

    fn remove_local_copies(&self) {
        for photo in &self.draft.photos {
            storage::remove_key(self.storage.as_ref(), &local_photo_key(&photo.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldRequirement, StepSchema};
    use crate::storage::MemoryStore;
    use serde_json::{json, Value};

    fn form(value: Value) -> FormData {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn schema() -> Arc<SurveySchema> {
        Arc::new(SurveySchema {
            steps: vec![
                StepSchema {
                    title: "Site".into(),
                    required: vec![FieldRequirement::new("site.address")],
                },
                StepSchema {
                    title: "Hazards".into(),
                    required: vec![
                        FieldRequirement::new("hazards.asbestos"),
                        FieldRequirement::new("hazards.notes"),
                    ],
                },
            ],
        })
    }

    fn setup() -> (Arc<MemoryStore>, SurveyDraftStore) {
        let storage = Arc::new(MemoryStore::new());
        let store = SurveyDraftStore::create(schema(), storage.clone());
        (storage, store)
    }

    #[test]
    fn test_step_floor() {
        let (_, mut store) = setup();
        for _ in 0..5 {
            store.prev_step();
        }
        assert_eq!(store.current_step(), 0);

        store.next_step();
        store.next_step();
        assert_eq!(store.current_step(), 2);

        store.set_step(-5);
        assert_eq!(store.current_step(), 0);

        store.set_step(7);
        assert_eq!(store.current_step(), 7);
    }

    #[test]
    fn test_update_form_data_merges() {
        let (_, mut store) = setup();
        store.update_form_data(&form(json!({"a": {"x": 1}})));
        store.update_form_data(&form(json!({"a": {"y": 2}})));
        assert_eq!(Value::Object(store.form_data().clone()), json!({"a": {"x": 1, "y": 2}}));

        store.set_validation_errors(BTreeMap::from([("a.z".to_string(), "bad".to_string())]));
        store.add_photo(NewPhoto::new("photo_local/1"));
        store.clear_form_data();

        assert!(store.form_data().is_empty());
        assert_eq!(store.photos().len(), 1);
        assert_eq!(store.validation_errors().len(), 1);
    }

    #[test]
    fn test_photo_operations() {
        let (_, mut store) = setup();
        let first = store.add_photo(NewPhoto::new("photo_local/a"));
        let suggested = Uuid::new_v4();
        let second = store.add_photo(NewPhoto::new("photo_local/b").with_id(suggested));
        assert_eq!(second, suggested);

        // Duplicate suggestion gets a fresh id
        let third = store.add_photo(NewPhoto::new("photo_local/c").with_id(suggested));
        assert_ne!(third, suggested);
        assert_eq!(store.photos().len(), 3);

        store.update_photo(&first, &PhotoPatch::default().caption("Cracked render"));
        assert_eq!(store.photo(&first).unwrap().caption.as_deref(), Some("Cracked render"));

        // Unknown ids are no-ops
        store.update_photo(&Uuid::new_v4(), &PhotoPatch::default().caption("x"));
        assert!(store.remove_photo(&Uuid::new_v4()).is_none());

        store.remove_photo(&second);
        let ids: Vec<Uuid> = store.photos().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first, third]);

        store.clear_photos();
        assert!(store.photos().is_empty());
    }

    #[test]
    fn test_removing_photo_drops_display_copy() {
        let (storage, mut store) = setup();
        let id = Uuid::new_v4();
        storage::write_blob(storage.as_ref(), &local_photo_key(&id), &[1, 2, 3]);
        store.add_photo(NewPhoto::new(local_photo_key(&id)).with_id(id));

        store.remove_photo(&id);
        assert!(storage.get(&local_photo_key(&id)).unwrap().is_none());
    }

    #[test]
    fn test_validation_is_pure() {
        let (_, mut store) = setup();
        assert!(!store.validate_step(0));
        assert!(store.validation_errors().is_empty());
        assert!(store.validate_step(9));

        store.update_form_data(&form(json!({"site": {"address": "1 Mill Lane"}})));
        assert!(store.validate_step(0));
        assert!(!store.can_complete());

        let errors = store.step_errors(1);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["hazards.notes"], "hazards.notes is required");

        store.update_form_data(&form(json!({"hazards": {"asbestos": false, "notes": "none seen"}})));
        assert!(store.can_complete());

        store.set_validation_errors(BTreeMap::from([(
            "hazards.notes".to_string(),
            "Too short".to_string(),
        )]));
        assert!(!store.can_complete());
        store.clear_validation_errors();
        assert!(store.can_complete());
    }

    #[test]
    fn test_complete_is_monotonic_until_reset() {
        let (_, mut store) = setup();
        store.mark_complete();
        store.update_form_data(&form(json!({"late": "edit"})));
        store.prev_step();
        assert!(store.is_complete());

        store.next_step();
        store.add_photo(NewPhoto::new("photo_local/x"));
        store.reset();

        let id = store.id();
        assert_eq!(store.draft(), &SurveyDraft { created_at: store.draft().created_at, ..SurveyDraft::new(id) });
        assert!(!store.is_complete());
        assert_eq!(store.current_step(), 0);
        assert!(store.photos().is_empty());
    }

    #[test]
    fn test_round_trip_persistence() {
        let (storage, mut store) = setup();
        store.update_form_data(&form(json!({
            "site": {"address": "1 Mill Lane", "rooms": [{"name": "Boiler", "area": 12.5}]},
            "flags": [true, false],
            "inspector": null
        })));
        store.next_step();
        store.add_photo(NewPhoto {
            caption: Some("Roof".into()),
            location: Some("East side".into()),
            width: 1600,
            height: 1200,
            ..NewPhoto::new("photo_local/1")
        });
        store.set_validation_errors(BTreeMap::from([("site.rooms".into(), "Check".into())]));
        store.mark_complete();

        let restored = SurveyDraftStore::load(store.id(), schema(), storage);
        assert_eq!(restored.draft(), store.draft());
    }

    #[test]
    fn test_corrupted_storage_falls_back_to_initial() {
        let storage = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();

        for garbage in ["", "{", "\u{0}\u{1}garbage", "[1,2,3]", r#"{"currentStep": -4}"#] {
            storage.set(&draft_key(&id), garbage).unwrap();
            let store = SurveyDraftStore::load(id, schema(), storage.clone());
            assert_eq!(store.id(), id);
            assert_eq!(store.current_step(), 0);
            assert!(store.form_data().is_empty());
            assert!(store.photos().is_empty());
            assert!(!store.is_complete());
        }

        // A record belonging to another survey is corruption too
        let other = SurveyDraftStore::create(schema(), storage.clone());
        let mut other_draft = other.draft().clone();
        other_draft.current_step = 3;
        storage::write_record(storage.as_ref(), &draft_key(&id), &other_draft);
        let store = SurveyDraftStore::load(id, schema(), storage);
        assert_eq!(store.current_step(), 0);
    }

    #[test]
    fn test_record_without_id_keeps_its_fields() {
        let storage = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        storage
            .set(
                &draft_key(&id),
                r#"{"currentStep": 2, "formData": {"site": {"rooms": 4}}, "isComplete": true}"#,
            )
            .unwrap();

        let store = SurveyDraftStore::load(id, schema(), storage);
        assert_eq!(store.id(), id);
        assert_eq!(store.current_step(), 2);
        assert_eq!(store.form_data().get("site"), Some(&json!({"rooms": 4})));
        assert!(store.is_complete());
    }

    #[test]
    fn test_floats_survive_persistence_exactly() {
        let (storage, mut store) = setup();
        let values = [
            3.839838325982947e149,
            0.1 + 0.2,
            -47.608_745_193_624_11,
            2.225_073_858_507_201e-308,
            f64::MAX,
            123_456.789_012_345_68,
        ];
        let answers: Vec<Value> = values.iter().map(|v| json!(v)).collect();
        store.update_form_data(&form(json!({ "readings": answers })));

        let restored = SurveyDraftStore::load(store.id(), schema(), storage);
        let readings = restored.form_data()["readings"].as_array().unwrap();
        for (value, original) in readings.iter().zip(values) {
            assert_eq!(value.as_f64().unwrap().to_bits(), original.to_bits());
        }
        assert_eq!(restored.draft(), store.draft());
    }
}
