use std::collections::{BTreeMap, BTreeSet};

use crate::model::Group;

/// Reverse index from light id to the ids of the groups listing it.
///
/// The "all lights" group is never indexed, since its membership is
/// implicit.
#[derive(Debug, Default)]
pub struct MembershipIndex {
    groups_by_light: BTreeMap<String, BTreeSet<String>>,
}

impl MembershipIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild<'a>(&mut self, groups: impl IntoIterator<Item = (&'a String, &'a Group)>) {
        self.groups_by_light.clear();
        for (id, group) in groups {
            self.insert(id, group);
        }
    }

    pub fn insert(&mut self, group_id: &str, group: &Group) {
        if group.is_all_lights() {
            return;
        }
        for light in &group.members {
            self.groups_by_light
                .entry(light.clone())
                .or_default()
                .insert(group_id.to_string());
        }
    }

    pub fn remove(&mut self, group_id: &str) {
        self.groups_by_light.retain(|_, groups| {
            groups.remove(group_id);
            !groups.is_empty()
        });
    }

    /// Re-index one group after its membership changed.
    pub fn replace(&mut self, group_id: &str, group: &Group) {
        self.remove(group_id);
        self.insert(group_id, group);
    }

    pub fn groups_for(&self, light_id: &str) -> impl Iterator<Item = &String> {
        self.groups_by_light.get(light_id).into_iter().flatten()
    }
}
