use std::collections::{BTreeMap, BTreeSet};

use huesync_api::{BridgeServer, EntityType, GroupAttributePolicy, LightDelta};

use crate::cache::{CacheError, CacheResult, EntityCache, EntityMap};
use crate::index::MembershipIndex;
use crate::model::{
    AttributeDelta, EntityRecord, EntityUpdate, Group, GroupDelta, Light, Origin, Scene,
    SceneDelta, SceneKind, Update,
};
use crate::pending::PendingOverlay;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PropagatorOptions {
    pub scene_exclusive: bool,
    pub include_ungrouped_scenes: bool,
    pub scene_off_on_group_off: bool,
    pub group_attributes: GroupAttributePolicy,
}

impl Default for PropagatorOptions {
    fn default() -> Self {
        Self {
            scene_exclusive: true,
            include_ungrouped_scenes: false,
            scene_off_on_group_off: true,
            group_attributes: GroupAttributePolicy::LastChangedWins,
        }
    }
}

impl From<&BridgeServer> for PropagatorOptions {
    fn from(server: &BridgeServer) -> Self {
        Self {
            scene_exclusive: server.scene_exclusive,
            include_ungrouped_scenes: server.include_ungrouped_scenes,
            scene_off_on_group_off: server.scene_off_on_group_off,
            group_attributes: server.group_attributes,
        }
    }
}

/// Owns the mirrored state of one bridge, and turns raw updates into the
/// set of downstream changes they imply.
///
/// All mutation of the cache goes through here. Group on-state is never
/// stored, it is derived from the member lights every time a group is
/// viewed. Every outgoing update is compared with the last one emitted for
/// the same entity, and dropped if nothing changed.
#[derive(Debug)]
pub struct StatePropagator {
    name: String,
    cache: EntityCache,
    pending: PendingOverlay,
    index: MembershipIndex,
    emitted: BTreeMap<(EntityType, String), EntityRecord>,
    options: PropagatorOptions,
}

impl StatePropagator {
    #[must_use]
    pub fn new(name: impl Into<String>, options: PropagatorOptions) -> Self {
        Self {
            name: name.into(),
            cache: EntityCache::new(),
            pending: PendingOverlay::new(),
            index: MembershipIndex::new(),
            emitted: BTreeMap::new(),
            options,
        }
    }

    #[must_use]
    pub fn is_populated(&self, etype: EntityType) -> bool {
        self.cache.is_populated(etype)
    }

    /// Drop all data for one entity type. It stays unreadable until the next
    /// full snapshot of that type is applied.
    pub fn clear(&mut self, etype: EntityType) {
        log::info!("[{}] Clearing {etype} cache", self.name);
        self.cache.clear(etype);
        self.pending.discard_type(etype);
        if etype == EntityType::Group {
            self.index = MembershipIndex::new();
        }
    }

    /// Forget the last value emitted for an entity, so its current view is
    /// sent again the next time it is checked. Used when a sink rejected it.
    pub fn forget_emitted(&mut self, etype: EntityType, id: &str) {
        self.emitted.remove(&(etype, id.to_string()));
    }

    pub fn take_refresh_requests(&mut self) -> BTreeSet<EntityType> {
        self.cache.take_refresh_requests()
    }

    /// The current downstream view of one entity, overlay and derived state
    /// included.
    pub fn get(&self, etype: EntityType, id: &str) -> CacheResult<EntityRecord> {
        self.cache.get(etype, id)?;
        self.view(etype, id)
            .ok_or(CacheError::NotPopulated(EntityType::Light))
    }

    pub fn all(&self, etype: EntityType) -> CacheResult<EntityMap> {
        let records = self.cache.all(etype)?;
        Ok(records
            .keys()
            .filter_map(|id| Some((id.clone(), self.view(etype, id)?)))
            .collect())
    }

    /// The owning group of a scene, if the scene is known and has one.
    #[must_use]
    pub fn scene_group(&self, scene_id: &str) -> Option<String> {
        self.cache
            .get_as::<Scene>(EntityType::Scene, scene_id)
            .ok()
            .and_then(|scene| scene.group.clone())
    }

    fn light_view(&self, id: &str) -> Option<Light> {
        let record = self.cache.get(EntityType::Light, id).ok()?;
        match self.pending.view(EntityType::Light, id, record) {
            EntityRecord::Light(light) => Some(light),
            _ => None,
        }
    }

    /// Fill in the derived on-state of a group from its members.
    ///
    /// Members that are not known lights are skipped. Returns `None` while
    /// lights have not been fetched, since nothing can be derived yet.
    fn derive_group(&self, group: &mut Group) -> Option<()> {
        let lights = self.cache.all(EntityType::Light).ok()?;

        let on = if group.is_all_lights() {
            lights
                .keys()
                .filter_map(|id| self.light_view(id))
                .any(|light| light.state.on)
        } else {
            group
                .members
                .iter()
                .filter_map(|id| self.light_view(id))
                .any(|light| light.state.on)
        };

        group.state.on = on;
        Some(())
    }

    fn view(&self, etype: EntityType, id: &str) -> Option<EntityRecord> {
        let record = self.cache.get(etype, id).ok()?;
        let mut view = self.pending.view(etype, id, record);
        if let EntityRecord::Group(group) = &mut view {
            self.derive_group(group)?;
        }
        Some(view)
    }

    /// Emit the current view of an entity, unless it equals the last value
    /// emitted for it.
    fn emit(&mut self, etype: EntityType, id: &str, out: &mut Vec<EntityUpdate>) -> bool {
        let Some(view) = self.view(etype, id) else {
            return false;
        };

        let key = (etype, id.to_string());
        if self.emitted.get(&key) == Some(&view) {
            return false;
        }

        log::debug!("[{}] {etype} {id} updated", self.name);
        self.emitted.insert(key, view.clone());
        out.push(EntityUpdate {
            entity_type: etype,
            id: id.to_string(),
            state: view,
        });
        true
    }

    fn emitted_group_on(&self, id: &str) -> Option<bool> {
        match self.emitted.get(&(EntityType::Group, id.to_string())) {
            Some(EntityRecord::Group(group)) => Some(group.state.on),
            _ => None,
        }
    }

    fn emit_group(&mut self, id: &str, out: &mut Vec<EntityUpdate>) {
        let was_on = self.emitted_group_on(id);
        if !self.emit(EntityType::Group, id, out) {
            return;
        }

        let turned_off = was_on == Some(true) && self.emitted_group_on(id) == Some(false);
        if turned_off && self.options.scene_off_on_group_off {
            for scene_id in self.active_scenes_of(id) {
                self.set_scene_active(&scene_id, false, out);
            }
        }
    }

    fn scenes_where(&self, pred: impl Fn(&str, &Scene) -> bool) -> Vec<String> {
        let Ok(scenes) = self.cache.all(EntityType::Scene) else {
            return vec![];
        };
        scenes
            .iter()
            .filter_map(|(id, rec)| match rec {
                EntityRecord::Scene(scene) if pred(id, scene) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn active_scenes_of(&self, group_id: &str) -> Vec<String> {
        self.scenes_where(|_, scene| scene.active && scene.group.as_deref() == Some(group_id))
    }

    fn set_scene_active(&mut self, id: &str, active: bool, out: &mut Vec<EntityUpdate>) {
        let delta = AttributeDelta::Scene(SceneDelta {
            active: Some(active),
        });
        if self
            .cache
            .update(EntityType::Scene, id, |rec| {
                rec.apply(&delta);
            })
            .is_ok()
        {
            self.emit(EntityType::Scene, id, out);
        }
    }

    /// Every group whose derived state depends on the given light.
    fn groups_containing(&self, light_id: &str) -> BTreeSet<String> {
        let mut groups: BTreeSet<String> = self.index.groups_for(light_id).cloned().collect();
        if let Ok(all) = self.cache.all(EntityType::Group) {
            groups.extend(all.iter().filter_map(|(id, rec)| match rec {
                EntityRecord::Group(group) if group.is_all_lights() => Some(id.clone()),
                _ => None,
            }));
        }
        groups
    }

    /// Known lights a group command should reach.
    fn command_targets(&self, group_id: &str) -> Vec<String> {
        let Ok(lights) = self.cache.all(EntityType::Light) else {
            return vec![];
        };
        match self.cache.get_as::<Group>(EntityType::Group, group_id) {
            Ok(group) if group.is_all_lights() => lights.keys().cloned().collect(),
            Ok(group) => group
                .members
                .iter()
                .filter(|id| lights.contains_key(*id))
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    fn resolve_target(&self, update: &Update) -> Option<EntityType> {
        update
            .delta
            .candidate_types()
            .iter()
            .copied()
            .find(|etype| self.cache.get(*etype, &update.id).is_ok())
    }

    /// Store a delta: authoritative data patches the cache and drops any
    /// overlay, local commands only touch the overlay.
    fn write(&mut self, origin: Origin, etype: EntityType, id: &str, delta: AttributeDelta) {
        if origin.is_authoritative() {
            self.pending.discard(etype, id);
            let res = self.cache.update(etype, id, |rec| {
                rec.apply(&delta);
            });
            if let Err(err) = res {
                log::trace!("[{}] Dropped {etype} {id} update: {err}", self.name);
            }
        } else {
            self.pending.set(etype, id, delta);
        }
    }

    /// Carry a member light's color and level onto one of its groups.
    fn copy_color_to_group(&mut self, origin: Origin, group_id: &str, color: &LightDelta) {
        let delta = AttributeDelta::Group(GroupDelta {
            action: color.clone(),
            ..GroupDelta::default()
        });
        if origin.is_authoritative() {
            // fresh color from the bridge replaces anything commanded
            self.pending.discard(EntityType::Group, group_id);
            let _ = self.cache.update(EntityType::Group, group_id, |rec| {
                rec.apply(&delta);
            });
        } else {
            self.pending.set(EntityType::Group, group_id, delta);
        }
    }

    /// Apply one update, returning every downstream change it causes.
    pub fn apply(&mut self, update: Update) -> Vec<EntityUpdate> {
        let Some(etype) = self.resolve_target(&update) else {
            log::trace!(
                "[{}] Ignoring update for unknown entity {:?}",
                self.name,
                update.id
            );
            return vec![];
        };

        let Update { origin, id, delta } = update;
        let mut out = vec![];

        match delta {
            AttributeDelta::Light(delta) => self.apply_light(origin, &id, delta, &mut out),
            AttributeDelta::Group(delta) => self.apply_group(origin, &id, delta, &mut out),
            AttributeDelta::Scene(delta) => self.apply_scene(&id, delta, &mut out),
            delta => {
                self.write(origin, etype, &id, delta);
                self.emit(etype, &id, &mut out);
            }
        }

        out
    }

    fn apply_light(
        &mut self,
        origin: Origin,
        id: &str,
        delta: LightDelta,
        out: &mut Vec<EntityUpdate>,
    ) {
        let color = delta.color_and_level();
        self.write(origin, EntityType::Light, id, AttributeDelta::Light(delta));
        self.emit(EntityType::Light, id, out);

        let copy_color = self.options.group_attributes == GroupAttributePolicy::LastChangedWins
            && color.has_color_or_level();

        for group_id in self.groups_containing(id) {
            if copy_color {
                self.copy_color_to_group(origin, &group_id, &color);
            }
            self.emit_group(&group_id, out);
        }
    }

    fn apply_group(
        &mut self,
        origin: Origin,
        id: &str,
        delta: GroupDelta,
        out: &mut Vec<EntityUpdate>,
    ) {
        if origin.is_authoritative() {
            let members_changed = delta.members.is_some();
            self.write(origin, EntityType::Group, id, AttributeDelta::Group(delta));
            if members_changed {
                if let Ok(group) = self.cache.get_as::<Group>(EntityType::Group, id) {
                    self.index.replace(id, group);
                }
            }
            self.emit_group(id, out);
            return;
        }

        // a local command: show the commanded state on every member light
        // right away, then re-derive every group those lights belong to
        let targets = self.command_targets(id);
        let action = delta.action.clone();
        self.pending
            .set(EntityType::Group, id, AttributeDelta::Group(delta));

        let mut affected = BTreeSet::new();
        for light_id in &targets {
            self.pending.set(
                EntityType::Light,
                light_id,
                AttributeDelta::Light(action.clone()),
            );
            self.emit(EntityType::Light, light_id, out);
            affected.extend(self.groups_containing(light_id));
        }

        self.emit_group(id, out);
        affected.remove(id);
        for group_id in affected {
            self.emit_group(&group_id, out);
        }
    }

    fn apply_scene(&mut self, id: &str, delta: SceneDelta, out: &mut Vec<EntityUpdate>) {
        // scene state is inferred locally, so every origin writes through
        let activated = delta.active == Some(true);
        self.set_scene_active(id, activated, out);

        if !activated || !self.options.scene_exclusive {
            return;
        }

        let Some(group) = self.scene_group(id) else {
            return;
        };

        let siblings = self.scenes_where(|other, scene| {
            other != id && scene.group.as_deref() == Some(group.as_str())
        });
        for sibling in siblings {
            self.set_scene_active(&sibling, false, out);
        }
    }

    /// Replace everything known about one entity type with a full snapshot.
    pub fn apply_snapshot(&mut self, etype: EntityType, mut records: EntityMap) -> Vec<EntityUpdate> {
        if etype == EntityType::Scene {
            if !self.options.include_ungrouped_scenes {
                records.retain(|_, rec| {
                    !matches!(rec, EntityRecord::Scene(scene)
                        if scene.kind == SceneKind::LightScene && scene.group.is_none())
                });
            }

            // activation is never reported by the bridge, keep what we inferred
            for (id, rec) in &mut records {
                if let (EntityRecord::Scene(scene), Ok(old)) =
                    (rec, self.cache.get_as::<Scene>(EntityType::Scene, id))
                {
                    scene.active = old.active;
                }
            }
        }

        if let Err(err) = self.cache.replace_all(etype, records) {
            log::warn!("[{}] Rejected {etype} snapshot: {err}", self.name);
            return vec![];
        }

        if etype == EntityType::Group
            && self.cache.get(EntityType::Group, Group::ALL_LIGHTS_ID).is_err()
        {
            let all = EntityRecord::from(Group::all_lights());
            if let Err(err) = self.cache.put(EntityType::Group, Group::ALL_LIGHTS_ID, all) {
                log::warn!("[{}] Cannot add all lights group: {err}", self.name);
            }
        }

        self.pending.discard_type(etype);

        let ids: Vec<String> = self
            .cache
            .all(etype)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();

        let known: BTreeSet<&String> = ids.iter().collect();
        self.emitted
            .retain(|(kind, id), _| *kind != etype || known.contains(id));

        if etype == EntityType::Group {
            if let Ok(groups) = self.cache.all(EntityType::Group) {
                self.index
                    .rebuild(groups.iter().filter_map(|(id, rec)| match rec {
                        EntityRecord::Group(group) => Some((id, group)),
                        _ => None,
                    }));
            }
        }

        let mut out = vec![];
        for id in &ids {
            if etype == EntityType::Group {
                self.emit_group(id, &mut out);
            } else {
                self.emit(etype, id, &mut out);
            }
        }

        // group state is derived from lights
        if etype == EntityType::Light {
            let groups: Vec<String> = self
                .cache
                .all(EntityType::Group)
                .map(|records| records.keys().cloned().collect())
                .unwrap_or_default();
            for id in &groups {
                self.emit_group(id, &mut out);
            }
        }

        log::debug!(
            "[{}] Applied {etype} snapshot: {} entities, {} updates",
            self.name,
            ids.len(),
            out.len()
        );

        out
    }
}
