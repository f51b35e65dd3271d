use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::date_format;
use crate::error::HueError;

/// Error entry as reported by the bridge in a legacy api reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HueApiError {
    #[serde(rename = "type")]
    pub typ: u32,
    pub address: String,
    pub description: String,
}

impl HueApiError {
    pub const UNAUTHORIZED_USER: u32 = 1;
    pub const RESOURCE_NOT_AVAILABLE: u32 = 3;
    pub const DEVICE_OFF: u32 = 201;
}

impl From<HueApiError> for HueError {
    fn from(err: HueApiError) -> Self {
        Self::BridgeError {
            typ: err.typ,
            address: err.address,
            description: err.description,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HueApiResult<T> {
    Success(T),
    Error(HueApiError),
}

impl<T> HueApiResult<T> {
    pub fn into_result(self) -> Result<T, HueError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error(err) => Err(err.into()),
        }
    }
}

/// Reply from the unauthenticated `/api/config` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiShortConfig {
    pub name: String,
    pub bridgeid: String,
    pub modelid: String,
    pub apiversion: String,
    pub swversion: String,
    pub mac: String,
    #[serde(default)]
    pub datastoreversion: Option<String>,
    #[serde(default)]
    pub factorynew: bool,
    #[serde(default)]
    pub replacesbridgeid: Option<String>,
    #[serde(default)]
    pub starterkitid: String,
}

impl ApiShortConfig {
    /// Bridge ids are reported in upper case but configured by hand, so
    /// compare without regard to case.
    #[must_use]
    pub fn matches_bridge_id(&self, bridge_id: &str) -> bool {
        self.bridgeid.eq_ignore_ascii_case(bridge_id)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LightColorMode {
    Ct,
    Xy,
    Hs,
}

const fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiLightState {
    #[serde(default)]
    pub on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colormode: Option<LightColorMode>,
    #[serde(default = "default_true")]
    pub reachable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiLight {
    pub name: String,
    pub state: ApiLightState,
    #[serde(rename = "type", default)]
    pub light_type: String,
    #[serde(default)]
    pub modelid: String,
    #[serde(default)]
    pub manufacturername: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueid: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ApiGroupAction {
    #[serde(default)]
    pub on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colormode: Option<LightColorMode>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum ApiGroupType {
    Entertainment,
    #[default]
    LightGroup,
    Luminaire,
    LightSource,
    Room,
    Zone,
    #[serde(other)]
    Other,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApiGroupState {
    pub all_on: bool,
    pub any_on: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiGroup {
    pub name: String,
    #[serde(default)]
    pub lights: Vec<String>,
    #[serde(default)]
    pub action: ApiGroupAction,
    #[serde(rename = "type", default)]
    pub group_type: ApiGroupType,
    #[serde(default)]
    pub state: ApiGroupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum ApiSceneType {
    #[default]
    LightScene,
    GroupScene,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiScene {
    pub name: String,
    #[serde(rename = "type", default)]
    pub scene_type: ApiSceneType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub lights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub recycle: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(with = "date_format::legacy_naive_opt", default)]
    pub lastupdated: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ApiSensorState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttonevent: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectedrotation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,
    /// Hundredths of a degree Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lightlevel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daylight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(with = "date_format::legacy_naive_opt", default)]
    pub lastupdated: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApiSensorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiSensor {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(default)]
    pub state: ApiSensorState,
    #[serde(default)]
    pub config: ApiSensorConfig,
    #[serde(default)]
    pub modelid: String,
    #[serde(default)]
    pub manufacturername: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueid: Option<String>,
}

impl ApiSensor {
    pub const SWITCH_TYPES: [&'static str; 3] = ["ZLLSwitch", "ZGPSwitch", "ZLLRelativeRotary"];
    pub const LABS_MODEL_PREFIXES: [&'static str; 2] = ["HUELABS", "PHA_"];

    #[must_use]
    pub fn is_switch(&self) -> bool {
        Self::SWITCH_TYPES.contains(&self.sensor_type.as_str())
    }

    /// Hue Labs formulas expose their on/off switch as a generic status
    /// sensor with a recognizable model id, or as a generic flag.
    #[must_use]
    pub fn is_labs_activator(&self) -> bool {
        match self.sensor_type.as_str() {
            "CLIPGenericFlag" => true,
            "CLIPGenericStatus" => Self::LABS_MODEL_PREFIXES
                .iter()
                .any(|prefix| self.modelid.starts_with(prefix)),
            _ => false,
        }
    }
}

/// Legacy api collections addressable from an `id_v1` reference.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ApiResourceType {
    Groups,
    Lights,
    Scenes,
    Sensors,
}

impl ApiResourceType {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "groups" => Some(Self::Groups),
            "lights" => Some(Self::Lights),
            "scenes" => Some(Self::Scenes),
            "sensors" => Some(Self::Sensors),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ApiLightStateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitiontime: Option<u16>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiGroupUpdate {
    pub scene: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ApiGroupActionUpdate {
    GroupUpdate(ApiGroupUpdate),
    LightUpdate(ApiLightStateUpdate),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApiSensorStateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
}

/// A collection reply, decoded entry by entry.
///
/// Entries that fail to decode are returned separately so a single odd
/// device does not hide the rest of the collection.
#[derive(Debug)]
pub struct Collection<T> {
    pub items: BTreeMap<String, T>,
    pub rejected: Vec<(String, serde_json::Error)>,
}

impl<T: serde::de::DeserializeOwned> Collection<T> {
    pub fn decode(value: Value) -> Result<Self, HueError> {
        // an error reply from the bridge is an array, not an object
        if value.is_array() {
            let mut replies: Vec<HueApiResult<Value>> = serde_json::from_value(value)?;
            if let Some(reply) = replies.pop() {
                reply.into_result()?;
            }
            return Ok(Self {
                items: BTreeMap::new(),
                rejected: vec![],
            });
        }

        let raw: BTreeMap<String, Value> = serde_json::from_value(value)?;
        let mut items = BTreeMap::new();
        let mut rejected = vec![];
        for (id, entry) in raw {
            match serde_json::from_value(entry) {
                Ok(item) => {
                    items.insert(id, item);
                }
                Err(err) => rejected.push((id, err)),
            }
        }

        Ok(Self { items, rejected })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::HueError;
    use crate::legacy_api::{
        ApiGroup, ApiGroupActionUpdate, ApiGroupType, ApiGroupUpdate, ApiLight,
        ApiLightStateUpdate, ApiScene, ApiSceneType, ApiSensor, ApiShortConfig, Collection,
    };

    #[test]
    fn decode_light() {
        let light: ApiLight = serde_json::from_value(json!({
            "name": "Desk",
            "type": "Extended color light",
            "modelid": "LCT015",
            "state": {
                "on": true, "bri": 144, "ct": 366, "xy": [0.4, 0.4],
                "colormode": "ct", "reachable": false, "alert": "none",
            },
        }))
        .unwrap();

        assert!(light.state.on);
        assert_eq!(light.state.bri, Some(144));
        assert!(!light.state.reachable);
    }

    #[test]
    fn decode_group_with_unknown_type() {
        let group: ApiGroup = serde_json::from_value(json!({
            "name": "Tv",
            "type": "SomethingNew",
            "lights": ["1", "2"],
            "action": {"on": false},
            "state": {"all_on": false, "any_on": true},
        }))
        .unwrap();

        assert_eq!(group.group_type, ApiGroupType::Other);
        assert!(group.state.any_on);
    }

    #[test]
    fn decode_scene_without_group() {
        let scene: ApiScene = serde_json::from_value(json!({
            "name": "Relax",
            "lights": ["1"],
            "lastupdated": "none",
        }))
        .unwrap();

        assert_eq!(scene.scene_type, ApiSceneType::LightScene);
        assert!(scene.group.is_none());
        assert!(scene.lastupdated.is_none());
    }

    #[test]
    fn classify_sensors() {
        let switch: ApiSensor = serde_json::from_value(json!({
            "name": "Dimmer", "type": "ZLLSwitch", "state": {"buttonevent": 1002},
        }))
        .unwrap();
        let labs: ApiSensor = serde_json::from_value(json!({
            "name": "Formula", "type": "CLIPGenericStatus", "modelid": "HUELABSVTOGGLE",
            "state": {"status": 1},
        }))
        .unwrap();
        let status: ApiSensor = serde_json::from_value(json!({
            "name": "Other", "type": "CLIPGenericStatus", "modelid": "generic",
        }))
        .unwrap();

        assert!(switch.is_switch());
        assert!(labs.is_labs_activator());
        assert!(!status.is_labs_activator());
    }

    #[test]
    fn short_config_bridge_id_ignores_case() {
        let cfg: ApiShortConfig = serde_json::from_value(json!({
            "name": "Hue", "bridgeid": "001788FFFE123456", "modelid": "BSB002",
            "apiversion": "1.60.0", "swversion": "1960000000", "mac": "00:17:88:12:34:56",
        }))
        .unwrap();

        assert!(cfg.matches_bridge_id("001788fffe123456"));
        assert!(!cfg.matches_bridge_id("001788fffe000000"));
    }

    #[test]
    fn scene_recall_body() {
        let body = ApiGroupActionUpdate::GroupUpdate(ApiGroupUpdate { scene: "abc".into() });
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"scene": "abc"}));

        let body = ApiGroupActionUpdate::LightUpdate(ApiLightStateUpdate {
            on: Some(true),
            ..Default::default()
        });
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"on": true}));
    }

    #[test]
    fn collection_skips_bad_entries() {
        let coll: Collection<ApiLight> = Collection::decode(json!({
            "1": {"name": "Good", "state": {"on": true}},
            "2": {"state": {"on": true}},
        }))
        .unwrap();

        assert_eq!(coll.items.len(), 1);
        assert_eq!(coll.rejected.len(), 1);
        assert_eq!(coll.rejected[0].0, "2");
    }

    #[test]
    fn collection_reports_bridge_error() {
        let res = Collection::<ApiLight>::decode(json!([
            {"error": {"type": 1, "address": "/lights", "description": "unauthorized user"}}
        ]));

        assert!(matches!(res, Err(HueError::BridgeError { typ: 1, .. })));
    }
}
