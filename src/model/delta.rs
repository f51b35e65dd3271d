use chrono::{DateTime, Utc};
use serde::Serialize;

use huesync_api::{EntityCommand, EntityType, LightDelta};

use crate::model::entity::{ButtonAction, EntityRecord};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GroupDelta {
    pub action: LightDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SceneDelta {
    pub active: Option<bool>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct SensorDelta {
    pub presence: Option<bool>,
    pub temperature: Option<f64>,
    pub lux: Option<f64>,
    pub dark: Option<bool>,
    pub daylight: Option<bool>,
    pub battery: Option<u8>,
    pub reachable: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ButtonDelta {
    pub button: Option<u8>,
    pub action: Option<ButtonAction>,
    pub updated: Option<DateTime<Utc>>,
    pub battery: Option<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActivatorDelta {
    pub active: bool,
}

/// A partial change to one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeDelta {
    Light(LightDelta),
    Group(GroupDelta),
    Scene(SceneDelta),
    Sensor(SensorDelta),
    Button(ButtonDelta),
    LabsActivator(ActivatorDelta),
    /// Battery level of a device in the sensors collection. The event stream
    /// does not say which kind of sensor owns the battery.
    Battery(u8),
}

impl AttributeDelta {
    /// The entity types this delta may target, in lookup order.
    #[must_use]
    pub const fn candidate_types(&self) -> &'static [EntityType] {
        match self {
            Self::Light(_) => &[EntityType::Light],
            Self::Group(_) => &[EntityType::Group],
            Self::Scene(_) => &[EntityType::Scene],
            Self::Sensor(_) => &[EntityType::Sensor],
            Self::Button(_) => &[EntityType::Button],
            Self::LabsActivator(_) => &[EntityType::LabsActivator],
            Self::Battery(_) => &[EntityType::Sensor, EntityType::Button],
        }
    }

    /// Fold a later delta for the same entity into this one.
    ///
    /// Light-like deltas combine field by field. Anything else is replaced.
    pub fn merge(&mut self, later: Self) {
        match (self, later) {
            (Self::Light(this), Self::Light(that)) => this.merge(&that),
            (Self::Group(this), Self::Group(that)) => {
                this.action.merge(&that.action);
                if that.members.is_some() {
                    this.members = that.members;
                }
                if that.name.is_some() {
                    this.name = that.name;
                }
            }
            (this, that) => *this = that,
        }
    }
}

/// Where an update came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Issued locally, not yet confirmed by the bridge.
    Command,
    Poll,
    Push,
}

impl Origin {
    #[must_use]
    pub const fn is_authoritative(self) -> bool {
        !matches!(self, Self::Command)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Update {
    pub origin: Origin,
    pub id: String,
    pub delta: AttributeDelta,
}

impl Update {
    #[must_use]
    pub fn new(origin: Origin, id: impl Into<String>, delta: AttributeDelta) -> Self {
        Self {
            origin,
            id: id.into(),
            delta,
        }
    }

    #[must_use]
    pub fn push(id: impl Into<String>, delta: AttributeDelta) -> Self {
        Self::new(Origin::Push, id, delta)
    }

    /// The optimistic update implied by a local command.
    #[must_use]
    pub fn from_command(cmd: &EntityCommand) -> Self {
        let delta = match cmd {
            EntityCommand::Light { delta, .. } => AttributeDelta::Light(delta.clone()),
            EntityCommand::Group { delta, .. } => AttributeDelta::Group(GroupDelta {
                action: delta.clone(),
                ..GroupDelta::default()
            }),
            EntityCommand::ActivateScene { .. } => {
                AttributeDelta::Scene(SceneDelta { active: Some(true) })
            }
            EntityCommand::LabsActivator { active, .. } => {
                AttributeDelta::LabsActivator(ActivatorDelta { active: *active })
            }
        };
        Self::new(Origin::Command, cmd.id(), delta)
    }
}

/// Emitted downstream whenever an entity's visible state changes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityUpdate {
    pub entity_type: EntityType,
    pub id: String,
    pub state: EntityRecord,
}

#[cfg(test)]
mod tests {
    use huesync_api::{EntityCommand, EntityType, LightDelta};

    use crate::model::{AttributeDelta, GroupDelta, Origin, SceneDelta, Update};

    #[test]
    fn merge_group_deltas() {
        let mut first = AttributeDelta::Group(GroupDelta {
            action: LightDelta::default().with_on(true),
            members: Some(vec!["1".into()]),
            name: None,
        });
        first.merge(AttributeDelta::Group(GroupDelta {
            action: LightDelta::default().with_bri(20),
            ..Default::default()
        }));

        let AttributeDelta::Group(group) = first else {
            panic!("merge changed delta kind");
        };
        assert_eq!(group.action.on, Some(true));
        assert_eq!(group.action.bri, Some(20));
        assert_eq!(group.members, Some(vec!["1".to_string()]));
    }

    #[test]
    fn scene_command_is_activation() {
        let update = Update::from_command(&EntityCommand::ActivateScene {
            id: "s1".into(),
            group: Some("2".into()),
        });

        assert_eq!(update.origin, Origin::Command);
        assert!(!update.origin.is_authoritative());
        assert_eq!(update.id, "s1");
        assert_eq!(update.delta, AttributeDelta::Scene(SceneDelta { active: Some(true) }));
    }

    #[test]
    fn battery_targets_sensor_collection() {
        assert_eq!(
            AttributeDelta::Battery(80).candidate_types(),
            &[EntityType::Sensor, EntityType::Button]
        );
    }
}
