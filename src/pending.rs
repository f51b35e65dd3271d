use std::collections::BTreeMap;

use huesync_api::EntityType;

use crate::model::{AttributeDelta, EntityRecord};

/// Optimistic state from local commands that the bridge has not confirmed
/// yet.
///
/// Overlays are applied on top of cached records when building what is
/// shown downstream. Any authoritative update for an entity discards its
/// overlay outright, whether or not the two agree.
#[derive(Debug, Default)]
pub struct PendingOverlay {
    entries: BTreeMap<(EntityType, String), AttributeDelta>,
}

impl PendingOverlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commanded delta. Later commands to the same entity fold into
    /// the existing overlay.
    pub fn set(&mut self, etype: EntityType, id: &str, delta: AttributeDelta) {
        match self.entries.get_mut(&(etype, id.to_string())) {
            Some(existing) => existing.merge(delta),
            None => {
                self.entries.insert((etype, id.to_string()), delta);
            }
        }
    }

    pub fn discard(&mut self, etype: EntityType, id: &str) -> Option<AttributeDelta> {
        self.entries.remove(&(etype, id.to_string()))
    }

    pub fn discard_type(&mut self, etype: EntityType) {
        self.entries.retain(|(kind, _), _| *kind != etype);
    }

    #[must_use]
    pub fn get(&self, etype: EntityType, id: &str) -> Option<&AttributeDelta> {
        self.entries.get(&(etype, id.to_string()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The record as it should currently appear, overlay included.
    #[must_use]
    pub fn view(&self, etype: EntityType, id: &str, record: &EntityRecord) -> EntityRecord {
        let mut view = record.clone();
        if let Some(delta) = self.get(etype, id) {
            view.apply(delta);
        }
        view
    }
}
