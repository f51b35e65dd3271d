use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::{RType, ResourceLink};
use crate::error::{HueError, HueResult};
use crate::legacy_api::ApiResourceType;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Delete,
    Error,
}

/// One `data:` payload entry of the v2 event stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventBlock {
    pub creationtime: DateTime<Utc>,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Vec<EventItem>,
}

impl EventBlock {
    /// Decode the json array carried in one event stream message.
    pub fn parse_all(data: &str) -> HueResult<Vec<Self>> {
        Ok(serde_json::from_str(data)?)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct On {
    pub on: bool,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DimmingUpdate {
    pub brightness: f64,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct XyPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColorUpdate {
    pub xy: XyPoint,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorTemperatureUpdate {
    #[serde(default)]
    pub mirek: Option<u16>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ZigbeeStatus {
    Connected,
    Disconnected,
    ConnectivityIssue,
    UnidirectionalIncoming,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SceneActive {
    Inactive,
    Static,
    DynamicPalette,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SceneStatus {
    pub active: SceneActive,
}

/// The `status` field means different things for different resource types.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ItemStatus {
    Connectivity(ZigbeeStatus),
    Scene(SceneStatus),
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ButtonEvent {
    InitialPress,
    Repeat,
    ShortRelease,
    LongRelease,
    DoubleShortRelease,
    LongPress,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ButtonReport {
    pub updated: DateTime<Utc>,
    pub event: ButtonEvent,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ButtonUpdate {
    #[serde(default)]
    pub button_report: Option<ButtonReport>,
    #[serde(default)]
    pub last_event: Option<ButtonEvent>,
}

impl ButtonUpdate {
    #[must_use]
    pub fn event(&self) -> Option<ButtonEvent> {
        self.button_report
            .as_ref()
            .map(|report| report.event)
            .or(self.last_event)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemMetadata {
    #[serde(default)]
    pub control_id: Option<u8>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MotionUpdate {
    pub motion: bool,
    #[serde(default)]
    pub motion_valid: Option<bool>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TemperatureUpdate {
    pub temperature: f64,
    #[serde(default)]
    pub temperature_valid: Option<bool>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LightLevelUpdate {
    pub light_level: u32,
    #[serde(default)]
    pub light_level_valid: Option<bool>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerState {
    #[serde(default)]
    pub battery_level: Option<u8>,
}

/// Decode an optional attribute, treating a shape we do not understand as
/// absent. Resource types reuse field names with unrelated payloads.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// A changed resource. Every attribute is optional since updates only carry
/// what changed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventItem {
    pub id: Uuid,
    #[serde(default)]
    pub id_v1: Option<String>,
    #[serde(rename = "type")]
    pub rtype: RType,
    #[serde(default)]
    pub owner: Option<ResourceLink>,
    #[serde(default, deserialize_with = "lenient")]
    pub on: Option<On>,
    #[serde(default, deserialize_with = "lenient")]
    pub dimming: Option<DimmingUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub color: Option<ColorUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub color_temperature: Option<ColorTemperatureUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<ItemStatus>,
    #[serde(default, deserialize_with = "lenient")]
    pub button: Option<ButtonUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub metadata: Option<ItemMetadata>,
    #[serde(default, deserialize_with = "lenient")]
    pub motion: Option<MotionUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub temperature: Option<TemperatureUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub light: Option<LightLevelUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub power_state: Option<PowerState>,
}

/// A legacy api address such as `/lights/3`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct V1Ref {
    pub rtype: ApiResourceType,
    pub id: String,
}

impl V1Ref {
    pub fn parse(id_v1: &str) -> HueResult<Self> {
        let invalid = || HueError::InvalidIdV1(id_v1.to_string());

        let mut parts = id_v1.trim_start_matches('/').splitn(2, '/');
        let rtype = parts
            .next()
            .and_then(ApiResourceType::parse)
            .ok_or_else(invalid)?;
        let id = parts
            .next()
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(invalid)?;

        Ok(Self {
            rtype,
            id: id.to_string(),
        })
    }
}

impl EventItem {
    /// The legacy address of this resource, if it has one.
    #[must_use]
    pub fn v1_ref(&self) -> Option<V1Ref> {
        self.id_v1.as_deref().and_then(|s| V1Ref::parse(s).ok())
    }
}
