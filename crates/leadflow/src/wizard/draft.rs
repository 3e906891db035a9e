use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use super::form::FormData;

/// Storage key for the persisted wizard draft.
pub const DRAFT_STORAGE_KEY: &str = "apartment-wizard-draft";

/// Persistence seam for the in-progress draft: written after every merge,
/// read once at mount, removed on successful submission.
pub trait DraftStore: Send + Sync {
    fn load(&self) -> Option<FormData>;
    fn save(&self, form: &FormData);
    fn clear(&self);
}

/// Keyed in-memory store; doubles as the test double and as the draft store
/// for clients without durable local storage.
#[derive(Debug, Default)]
pub struct InMemoryDraftStore {
    slots: Mutex<HashMap<String, String>>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftStore for InMemoryDraftStore {
    fn load(&self) -> Option<FormData> {
        let slots = self.slots.lock().expect("draft mutex poisoned");
        let raw = slots.get(DRAFT_STORAGE_KEY)?;
        match serde_json::from_str(raw) {
            Ok(form) => Some(form),
            Err(err) => {
                warn!(%err, "discarding unreadable wizard draft");
                None
            }
        }
    }

    fn save(&self, form: &FormData) {
        match serde_json::to_string(form) {
            Ok(raw) => {
                let mut slots = self.slots.lock().expect("draft mutex poisoned");
                slots.insert(DRAFT_STORAGE_KEY.to_string(), raw);
            }
            Err(err) => warn!(%err, "failed to serialize wizard draft"),
        }
    }

    fn clear(&self) {
        let mut slots = self.slots.lock().expect("draft mutex poisoned");
        slots.remove(DRAFT_STORAGE_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_draft() {
        let store = InMemoryDraftStore::new();
        assert!(store.load().is_none());

        let form = FormData {
            neighborhood_id: Some("d1".to_string()),
            ..FormData::default()
        };
        store.save(&form);
        assert_eq!(store.load(), Some(form));

        store.clear();
        assert!(store.load().is_none());
    }
}
