use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource types found in the v2 event stream.
///
/// Only the types the mirror acts on are named. Everything else decodes as
/// [`RType::Unknown`] and is ignored downstream.
#[derive(Copy, Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RType {
    Bridge,
    Button,
    Device,
    DevicePower,
    GroupedLight,
    Light,
    LightLevel,
    Motion,
    RelativeRotary,
    Room,
    Scene,
    Temperature,
    ZigbeeConnectivity,
    Zone,
    #[serde(other)]
    Unknown,
}

/// Reference from one v2 resource to another, e.g. an item's `owner`.
#[derive(Copy, Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResourceLink {
    pub rid: Uuid,
    pub rtype: RType,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::api::{RType, ResourceLink};

    #[test]
    fn unknown_types_decode() {
        let rtype: RType = serde_json::from_str(r#""entertainment_configuration""#).unwrap();
        assert_eq!(rtype, RType::Unknown);

        let rtype: RType = serde_json::from_str(r#""grouped_light""#).unwrap();
        assert_eq!(rtype, RType::GroupedLight);
    }

    #[test]
    fn owner_link_decodes() {
        let json = r#"{"rid": "00000000-0000-0000-0000-000000000000", "rtype": "device"}"#;
        let link: ResourceLink = serde_json::from_str(json).unwrap();
        assert_eq!(link.rid, Uuid::nil());
        assert_eq!(link.rtype, RType::Device);
    }
}
