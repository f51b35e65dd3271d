use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use huesync_api::{ColorMode, EntityType, LightDelta};

use crate::model::delta::{ActivatorDelta, AttributeDelta, ButtonDelta, GroupDelta, SceneDelta, SensorDelta};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colormode: Option<ColorMode>,
}

impl ColorState {
    pub fn apply(&mut self, delta: &LightDelta) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(
                    if delta.$field.is_some() {
                        self.$field = delta.$field;
                    }
                )*
            };
        }
        take!(bri, hue, sat, ct, xy, colormode);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    pub reachable: bool,
    #[serde(flatten)]
    pub color: ColorState,
}

impl LightState {
    pub fn apply(&mut self, delta: &LightDelta) {
        if let Some(on) = delta.on {
            self.on = on;
        }
        if let Some(reachable) = delta.reachable {
            self.reachable = reachable;
        }
        self.color.apply(delta);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub name: String,
    pub model: String,
    pub state: LightState,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// The bridge's group "0", implicitly containing every light.
    AllLights,
    LightGroup,
    Room,
    Zone,
    Entertainment,
    Other,
}

/// Group state. `on` is derived as the OR over the members.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub on: bool,
    #[serde(flatten)]
    pub color: ColorState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub kind: GroupKind,
    pub members: Vec<String>,
    pub state: GroupState,
}

impl Group {
    pub const ALL_LIGHTS_ID: &'static str = "0";
    pub const ALL_LIGHTS_NAME: &'static str = "All Hue Lights";

    #[must_use]
    pub fn all_lights() -> Self {
        Self {
            name: Self::ALL_LIGHTS_NAME.to_string(),
            kind: GroupKind::AllLights,
            members: vec![],
            state: GroupState::default(),
        }
    }

    #[must_use]
    pub fn is_all_lights(&self) -> bool {
        self.kind == GroupKind::AllLights
    }

    /// Only color and membership are taken from a group delta. The on-state
    /// of a group is always derived from its members.
    pub fn apply(&mut self, delta: &GroupDelta) {
        self.state.color.apply(&delta.action);
        if let Some(members) = &delta.members {
            self.members.clone_from(members);
        }
        if let Some(name) = &delta.name {
            self.name.clone_from(name);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    LightScene,
    GroupScene,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    pub kind: SceneKind,
    pub group: Option<String>,
    pub lights: Vec<String>,
    /// Inferred from activations seen by this process. Never read from the
    /// bridge.
    pub active: bool,
}

impl Scene {
    pub const fn apply(&mut self, delta: &SceneDelta) {
        if let Some(active) = delta.active {
            self.active = active;
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SensorReading {
    Presence { presence: bool },
    Temperature { celsius: f64 },
    LightLevel { lux: f64, dark: Option<bool> },
    Daylight { daylight: Option<bool> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub model: String,
    pub reading: SensorReading,
    pub battery: Option<u8>,
    pub reachable: bool,
}

impl Sensor {
    pub fn apply(&mut self, delta: &SensorDelta) {
        match &mut self.reading {
            SensorReading::Presence { presence } => {
                if let Some(value) = delta.presence {
                    *presence = value;
                }
            }
            SensorReading::Temperature { celsius } => {
                if let Some(value) = delta.temperature {
                    *celsius = value;
                }
            }
            SensorReading::LightLevel { lux, dark } => {
                if let Some(value) = delta.lux {
                    *lux = value;
                }
                if delta.dark.is_some() {
                    *dark = delta.dark;
                }
            }
            SensorReading::Daylight { daylight } => {
                if delta.daylight.is_some() {
                    *daylight = delta.daylight;
                }
            }
        }
        if delta.battery.is_some() {
            self.battery = delta.battery;
        }
        if let Some(reachable) = delta.reachable {
            self.reachable = reachable;
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    Pushed,
    Held,
    Released,
    ReleasedAfterHold,
}

impl ButtonAction {
    /// Decode a legacy `buttonevent` code, e.g. `1002` is button 1 released.
    #[must_use]
    pub fn from_code(code: u16) -> Option<(u8, Self)> {
        let button = u8::try_from(code / 1000).ok()?;
        let action = match code % 1000 {
            0 => Self::Pushed,
            1 => Self::Held,
            2 => Self::Released,
            3 => Self::ReleasedAfterHold,
            _ => return None,
        };
        Some((button, action))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    pub button: u8,
    pub action: ButtonAction,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub name: String,
    pub model: String,
    pub last_event: Option<ButtonEvent>,
    pub battery: Option<u8>,
}

impl Button {
    pub fn apply(&mut self, delta: &ButtonDelta) {
        if let Some(action) = delta.action {
            let button = delta
                .button
                .or_else(|| self.last_event.as_ref().map(|ev| ev.button))
                .unwrap_or(1);
            self.last_event = Some(ButtonEvent {
                button,
                action,
                updated: delta.updated,
            });
        }
        if delta.battery.is_some() {
            self.battery = delta.battery;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabsActivator {
    pub name: String,
    pub active: bool,
}

impl LabsActivator {
    pub const fn apply(&mut self, delta: &ActivatorDelta) {
        self.active = delta.active;
    }
}

/// A fully constructed mirrored entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EntityRecord {
    Light(Light),
    Group(Group),
    Scene(Scene),
    Sensor(Sensor),
    Button(Button),
    LabsActivator(LabsActivator),
}

impl EntityRecord {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Light(_) => EntityType::Light,
            Self::Group(_) => EntityType::Group,
            Self::Scene(_) => EntityType::Scene,
            Self::Sensor(_) => EntityType::Sensor,
            Self::Button(_) => EntityType::Button,
            Self::LabsActivator(_) => EntityType::LabsActivator,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Light(obj) => &obj.name,
            Self::Group(obj) => &obj.name,
            Self::Scene(obj) => &obj.name,
            Self::Sensor(obj) => &obj.name,
            Self::Button(obj) => &obj.name,
            Self::LabsActivator(obj) => &obj.name,
        }
    }

    /// Patch this record with a delta of the same entity type.
    ///
    /// Returns false (leaving the record untouched) if the delta does not
    /// apply to this kind of record.
    pub fn apply(&mut self, delta: &AttributeDelta) -> bool {
        match (self, delta) {
            (Self::Light(obj), AttributeDelta::Light(delta)) => obj.state.apply(delta),
            (Self::Group(obj), AttributeDelta::Group(delta)) => obj.apply(delta),
            (Self::Scene(obj), AttributeDelta::Scene(delta)) => obj.apply(delta),
            (Self::Sensor(obj), AttributeDelta::Sensor(delta)) => obj.apply(delta),
            (Self::Button(obj), AttributeDelta::Button(delta)) => obj.apply(delta),
            (Self::LabsActivator(obj), AttributeDelta::LabsActivator(delta)) => obj.apply(delta),
            (Self::Sensor(obj), AttributeDelta::Battery(level)) => obj.battery = Some(*level),
            (Self::Button(obj), AttributeDelta::Battery(level)) => obj.battery = Some(*level),
            _ => return false,
        }
        true
    }
}

macro_rules! record_conversions {
    ($($name:ident),*) => {
        $(
            impl From<$name> for EntityRecord {
                fn from(value: $name) -> Self {
                    Self::$name(value)
                }
            }

            impl<'a> TryFrom<&'a EntityRecord> for &'a $name {
                type Error = EntityType;

                fn try_from(value: &'a EntityRecord) -> Result<Self, Self::Error> {
                    match value {
                        EntityRecord::$name(obj) => Ok(obj),
                        other => Err(other.entity_type()),
                    }
                }
            }

            impl<'a> TryFrom<&'a mut EntityRecord> for &'a mut $name {
                type Error = EntityType;

                fn try_from(value: &'a mut EntityRecord) -> Result<Self, Self::Error> {
                    match value {
                        EntityRecord::$name(obj) => Ok(obj),
                        other => Err(other.entity_type()),
                    }
                }
            }
        )*
    };
}

record_conversions!(Light, Group, Scene, Sensor, Button, LabsActivator);

#[cfg(test)]
mod tests {
    use huesync_api::{ColorMode, EntityType, LightDelta};

    use crate::model::{
        AttributeDelta, Button, ButtonAction, ButtonDelta, EntityRecord, GroupDelta, Light,
        LightState, SceneDelta,
    };

    fn light() -> Light {
        Light {
            name: "Desk".into(),
            model: "LCT015".into(),
            state: LightState {
                on: false,
                reachable: true,
                color: Default::default(),
            },
        }
    }

    #[test]
    fn light_delta_patches_state() {
        let mut rec = EntityRecord::from(light());
        let delta = LightDelta::default().with_on(true).with_ct(300);

        assert!(rec.apply(&AttributeDelta::Light(delta)));

        let obj: &Light = (&rec).try_into().unwrap();
        assert!(obj.state.on);
        assert_eq!(obj.state.color.ct, Some(300));
        assert_eq!(obj.state.color.colormode, Some(ColorMode::Ct));
    }

    #[test]
    fn mismatched_delta_is_rejected() {
        let mut rec = EntityRecord::from(light());
        let before = rec.clone();

        assert!(!rec.apply(&AttributeDelta::Scene(SceneDelta { active: Some(true) })));
        assert!(!rec.apply(&AttributeDelta::Group(GroupDelta::default())));
        assert_eq!(rec, before);
        assert_eq!(rec.entity_type(), EntityType::Light);
    }

    #[test]
    fn button_codes() {
        assert_eq!(ButtonAction::from_code(1002), Some((1, ButtonAction::Released)));
        assert_eq!(ButtonAction::from_code(4003), Some((4, ButtonAction::ReleasedAfterHold)));
        assert_eq!(ButtonAction::from_code(2000), Some((2, ButtonAction::Pushed)));
        assert_eq!(ButtonAction::from_code(1004), None);
    }

    #[test]
    fn button_delta_keeps_previous_button_number() {
        let mut button = Button {
            name: "Dimmer".into(),
            model: "RWL021".into(),
            last_event: None,
            battery: None,
        };

        button.apply(&ButtonDelta {
            button: Some(3),
            action: Some(ButtonAction::Pushed),
            ..Default::default()
        });
        button.apply(&ButtonDelta {
            action: Some(ButtonAction::Released),
            ..Default::default()
        });

        let ev = button.last_event.unwrap();
        assert_eq!(ev.button, 3);
        assert_eq!(ev.action, ButtonAction::Released);
    }
}
