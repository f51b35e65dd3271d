//! Conversion between bridge wire types and mirrored entities.

use std::collections::BTreeMap;

use hue::api::RType;
use hue::event::{ButtonEvent, EventBlock, EventItem, EventKind, ItemStatus, SceneActive, ZigbeeStatus};
use hue::legacy_api::{
    ApiGroup, ApiGroupType, ApiLight, ApiLightStateUpdate, ApiResourceType, ApiScene,
    ApiSceneType, ApiSensor, LightColorMode,
};
use hue::{brightness_to_bri, lightlevel_to_lux};
use huesync_api::{ColorMode, EntityType, LightDelta};

use crate::cache::EntityMap;
use crate::model::{
    AttributeDelta, Button, ButtonAction, ButtonDelta, ColorState, EntityRecord, Group,
    GroupDelta, GroupKind, GroupState, LabsActivator, Light, LightState, Scene, SceneDelta,
    SceneKind, Sensor, SensorDelta, SensorReading,
};
use crate::transport::PushEvent;

const fn color_mode(mode: LightColorMode) -> ColorMode {
    match mode {
        LightColorMode::Ct => ColorMode::Ct,
        LightColorMode::Xy => ColorMode::Xy,
        LightColorMode::Hs => ColorMode::Hs,
    }
}

#[must_use]
pub fn light(api: ApiLight) -> Light {
    let state = api.state;
    Light {
        name: api.name,
        model: api.modelid,
        state: LightState {
            on: state.on,
            reachable: state.reachable,
            color: ColorState {
                bri: state.bri,
                hue: state.hue,
                sat: state.sat,
                ct: state.ct,
                xy: state.xy,
                colormode: state.colormode.map(color_mode),
            },
        },
    }
}

#[must_use]
pub fn group(id: &str, api: ApiGroup) -> Group {
    let kind = if id == Group::ALL_LIGHTS_ID {
        GroupKind::AllLights
    } else {
        match api.group_type {
            ApiGroupType::LightGroup | ApiGroupType::Luminaire | ApiGroupType::LightSource => {
                GroupKind::LightGroup
            }
            ApiGroupType::Room => GroupKind::Room,
            ApiGroupType::Zone => GroupKind::Zone,
            ApiGroupType::Entertainment => GroupKind::Entertainment,
            ApiGroupType::Other => GroupKind::Other,
        }
    };

    let action = api.action;
    Group {
        name: api.name,
        kind,
        members: api.lights,
        state: GroupState {
            on: api.state.any_on,
            color: ColorState {
                bri: action.bri,
                hue: action.hue,
                sat: action.sat,
                ct: action.ct,
                xy: action.xy,
                colormode: action.colormode.map(color_mode),
            },
        },
    }
}

#[must_use]
pub fn scene(api: ApiScene) -> Scene {
    Scene {
        name: api.name,
        kind: match api.scene_type {
            ApiSceneType::LightScene => SceneKind::LightScene,
            ApiSceneType::GroupScene => SceneKind::GroupScene,
        },
        group: api.group,
        lights: api.lights,
        active: false,
    }
}

/// Classify one entry of the sensors collection. Sensors that are not
/// mirrored yield `None`.
#[must_use]
pub fn sensor(api: ApiSensor) -> Option<EntityRecord> {
    if api.is_switch() {
        let updated = api.state.lastupdated.map(|ts| ts.and_utc());
        let last_event = api
            .state
            .buttonevent
            .and_then(ButtonAction::from_code)
            .map(|(button, action)| crate::model::ButtonEvent {
                button,
                action,
                updated,
            });
        return Some(
            Button {
                name: api.name,
                model: api.modelid,
                last_event,
                battery: api.config.battery,
            }
            .into(),
        );
    }

    if api.is_labs_activator() {
        let active = api.state.status.is_some_and(|status| status != 0)
            || api.state.flag.unwrap_or(false);
        return Some(
            LabsActivator {
                name: api.name,
                active,
            }
            .into(),
        );
    }

    let state = &api.state;
    let reading = match api.sensor_type.as_str() {
        "ZLLPresence" => SensorReading::Presence {
            presence: state.presence.unwrap_or(false),
        },
        "ZLLTemperature" => SensorReading::Temperature {
            celsius: f64::from(state.temperature?) / 100.0,
        },
        "ZLLLightLevel" => SensorReading::LightLevel {
            lux: lightlevel_to_lux(state.lightlevel?),
            dark: state.dark,
        },
        "Daylight" => SensorReading::Daylight {
            daylight: state.daylight,
        },
        _ => return None,
    };

    Some(
        Sensor {
            name: api.name,
            model: api.modelid,
            reading,
            battery: api.config.battery,
            reachable: api.config.reachable.unwrap_or(true),
        }
        .into(),
    )
}

/// Split the sensors collection into the entity types it feeds.
///
/// Every sensor-backed type gets an entry, even if empty, so each of them
/// counts as fully populated after one fetch.
#[must_use]
pub fn sensors(items: BTreeMap<String, ApiSensor>) -> BTreeMap<EntityType, EntityMap> {
    let mut res: BTreeMap<EntityType, EntityMap> = [
        EntityType::Sensor,
        EntityType::Button,
        EntityType::LabsActivator,
    ]
    .into_iter()
    .map(|etype| (etype, EntityMap::new()))
    .collect();

    for (id, api) in items {
        if let Some(record) = sensor(api) {
            res.entry(record.entity_type())
                .or_default()
                .insert(id, record);
        }
    }
    res
}

#[must_use]
pub fn light_update(delta: &LightDelta) -> ApiLightStateUpdate {
    ApiLightStateUpdate {
        on: delta.on,
        bri: delta.bri,
        hue: delta.hue,
        sat: delta.sat,
        xy: delta.xy,
        ct: delta.ct,
        transitiontime: delta.transitiontime,
    }
}

const fn button_action(event: ButtonEvent) -> ButtonAction {
    match event {
        ButtonEvent::InitialPress => ButtonAction::Pushed,
        ButtonEvent::Repeat | ButtonEvent::LongPress => ButtonAction::Held,
        ButtonEvent::ShortRelease | ButtonEvent::DoubleShortRelease => ButtonAction::Released,
        ButtonEvent::LongRelease => ButtonAction::ReleasedAfterHold,
    }
}

fn light_delta(item: &EventItem) -> LightDelta {
    let mut delta = LightDelta::default();
    if let Some(on) = item.on {
        delta = delta.with_on(on.on);
    }
    if let Some(dimming) = item.dimming {
        delta = delta.with_bri(brightness_to_bri(dimming.brightness));
    }
    if let Some(color) = item.color {
        delta = delta.with_xy([color.xy.x, color.xy.y]);
    }
    if let Some(mirek) = item.color_temperature.and_then(|ct| ct.mirek) {
        delta = delta.with_ct(mirek);
    }
    delta
}

/// Translate one event stream item into a push event.
///
/// Items without a legacy id, and resource types that are not mirrored,
/// yield `None`.
#[must_use]
pub fn push_event(item: &EventItem) -> Option<PushEvent> {
    let v1 = item.v1_ref()?;

    let delta = match (item.rtype, v1.rtype) {
        (RType::Light, ApiResourceType::Lights) => AttributeDelta::Light(light_delta(item)),
        (RType::GroupedLight, ApiResourceType::Groups) => AttributeDelta::Group(GroupDelta {
            action: light_delta(item),
            ..GroupDelta::default()
        }),
        (RType::ZigbeeConnectivity, rtype) => {
            let Some(ItemStatus::Connectivity(status)) = item.status else {
                return None;
            };
            let reachable = status == ZigbeeStatus::Connected;
            match rtype {
                ApiResourceType::Lights => {
                    AttributeDelta::Light(LightDelta::default().with_reachable(reachable))
                }
                ApiResourceType::Sensors => AttributeDelta::Sensor(SensorDelta {
                    reachable: Some(reachable),
                    ..SensorDelta::default()
                }),
                _ => return None,
            }
        }
        (RType::Button, ApiResourceType::Sensors) => {
            let button = item.button.as_ref()?;
            AttributeDelta::Button(ButtonDelta {
                button: item.metadata.and_then(|meta| meta.control_id),
                action: Some(button_action(button.event()?)),
                updated: button.button_report.as_ref().map(|report| report.updated),
                battery: None,
            })
        }
        (RType::Motion, ApiResourceType::Sensors) => AttributeDelta::Sensor(SensorDelta {
            presence: Some(item.motion?.motion),
            ..SensorDelta::default()
        }),
        (RType::Temperature, ApiResourceType::Sensors) => AttributeDelta::Sensor(SensorDelta {
            temperature: Some(item.temperature?.temperature),
            ..SensorDelta::default()
        }),
        (RType::LightLevel, ApiResourceType::Sensors) => AttributeDelta::Sensor(SensorDelta {
            lux: Some(lightlevel_to_lux(item.light?.light_level)),
            ..SensorDelta::default()
        }),
        (RType::DevicePower, ApiResourceType::Sensors) => {
            AttributeDelta::Battery(item.power_state?.battery_level?)
        }
        (RType::Scene, ApiResourceType::Scenes) => {
            let Some(ItemStatus::Scene(status)) = item.status else {
                return None;
            };
            AttributeDelta::Scene(SceneDelta {
                active: Some(status.active != SceneActive::Inactive),
            })
        }
        _ => return None,
    };

    if let AttributeDelta::Light(delta) = &delta {
        if delta.is_empty() {
            return None;
        }
    }

    Some(PushEvent::new(v1.id, delta))
}

/// Decode the data of one server-sent event into push events.
///
/// Anything that does not parse is logged and skipped.
#[must_use]
pub fn push_events(name: &str, data: &str) -> Vec<PushEvent> {
    let blocks = match EventBlock::parse_all(data) {
        Ok(blocks) => blocks,
        Err(err) => {
            log::debug!("[{name}] Ignoring malformed event: {err}");
            return vec![];
        }
    };

    let mut res = vec![];
    for block in blocks {
        if block.kind != EventKind::Update {
            log::trace!("[{name}] Skipping {:?} event {}", block.kind, block.id);
            continue;
        }
        for item in &block.data {
            log::trace!("[{name}] Event item: {item:?}");
            res.extend(push_event(item));
        }
    }
    res
}
