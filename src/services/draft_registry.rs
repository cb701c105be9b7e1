use crate::models::SurveySchema;
use crate::services::draft_store::SurveyDraftStore;
use crate::storage::{self, KeyValueStore, DRAFT_PREFIX};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// All survey drafts held on this device
pub struct DraftRegistry {
    schema: Arc<SurveySchema>,
    storage: Arc<dyn KeyValueStore>,
    drafts: BTreeMap<Uuid, SurveyDraftStore>,
}

impl DraftRegistry {
    pub fn new(schema: Arc<SurveySchema>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            schema,
            storage,
            drafts: BTreeMap::new(),
        }
    }

    /// Restores every persisted draft. Unreadable records come back in their
    /// initial state; keys without a valid id are removed.
    pub fn load_all(schema: Arc<SurveySchema>, storage: Arc<dyn KeyValueStore>) -> Self {
        let mut registry = Self::new(schema, storage);

        let keys = match registry.storage.keys_with_prefix(DRAFT_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Could not list stored drafts: {}", e);
                Vec::new()
            }
        };

        for key in keys {
            match Uuid::parse_str(&key[DRAFT_PREFIX.len()..]) {
                Ok(id) => {
                    let store =
                        SurveyDraftStore::load(id, registry.schema.clone(), registry.storage.clone());
                    registry.drafts.insert(id, store);
                }
                Err(_) => {
                    log::warn!("Removing draft record with invalid key {}", key);
                    storage::remove_key(registry.storage.as_ref(), &key);
                }
            }
        }

        log::info!("Restored {} survey drafts", registry.drafts.len());
        registry
    }

    /// Starts a new draft and returns its id
    pub fn create(&mut self) -> Uuid {
        let store = SurveyDraftStore::create(self.schema.clone(), self.storage.clone());
        let id = store.id();
        store.save_to_storage();
        self.drafts.insert(id, store);
        log::debug!("Created survey draft {}", id);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&SurveyDraftStore> {
        self.drafts.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut SurveyDraftStore> {
        self.drafts.get_mut(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.drafts.contains_key(id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.drafts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Drafts marked complete, i.e. candidates for submission
    pub fn completed_ids(&self) -> Vec<Uuid> {
        self.drafts
            .values()
            .filter(|d| d.is_complete())
            .map(|d| d.id())
            .collect()
    }

    /// Removes the draft, its record and its display copies.
    ///
    /// Queue items are not touched here; see `SyncOrchestrator::discard_survey`.
    pub fn discard(&mut self, id: &Uuid) -> bool {
        match self.drafts.remove(id) {
            Some(store) => {
                store.delete_from_storage();
                log::info!("Discarded survey draft {}", id);
                true
            }
            None => false,
        }
    }

    pub fn schema(&self) -> &Arc<SurveySchema> {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPhoto;
    use crate::services::draft_store::{draft_key, local_photo_key};
    use crate::storage::MemoryStore;

    #[test]
    fn test_create_load_and_discard() {
        let storage = Arc::new(MemoryStore::new());
        let schema = Arc::new(SurveySchema::default());

        let mut registry = DraftRegistry::new(schema.clone(), storage.clone());
        let first = registry.create();
        let second = registry.create();
        registry.get_mut(&second).unwrap().mark_complete();
        let photo = registry
            .get_mut(&first)
            .unwrap()
            .add_photo(NewPhoto::new("photo_local/x"));
        storage.set(&local_photo_key(&photo), "AAAA").unwrap();

        let restored = DraftRegistry::load_all(schema.clone(), storage.clone());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.completed_ids(), vec![second]);
        assert_eq!(restored.get(&first).unwrap().photos().len(), 1);

        assert!(registry.discard(&first));
        assert!(!registry.discard(&first));
        assert!(storage.get(&draft_key(&first)).unwrap().is_none());
        assert!(storage.get(&local_photo_key(&photo)).unwrap().is_none());
        assert_eq!(DraftRegistry::load_all(schema, storage).ids(), vec![second]);
    }

    #[test]
    fn test_load_all_survives_bad_records() {
        let storage = Arc::new(MemoryStore::new());
        let schema = Arc::new(SurveySchema::default());
        let id = Uuid::new_v4();
        storage.set(&draft_key(&id), "{{{{").unwrap();
        storage.set("survey_draft/not-a-uuid", "{}").unwrap();

        let registry = DraftRegistry::load_all(schema, storage.clone());
        assert_eq!(registry.ids(), vec![id]);
        assert_eq!(registry.get(&id).unwrap().current_step(), 0);
        assert!(storage.get("survey_draft/not-a-uuid").unwrap().is_none());
    }
}
