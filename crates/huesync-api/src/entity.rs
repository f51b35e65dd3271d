use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kinds of bridge-managed objects that are mirrored.
///
/// The declaration order is also the order a full refresh walks the
/// collections in, so lights are always known before groups derive from them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Light,
    Group,
    Scene,
    Sensor,
    Button,
    LabsActivator,
}

impl EntityType {
    pub const ALL: [Self; 6] = [
        Self::Light,
        Self::Group,
        Self::Scene,
        Self::Sensor,
        Self::Button,
        Self::LabsActivator,
    ];

    /// Name of the legacy api collection holding this entity type.
    ///
    /// Buttons and labs activators are reported by the bridge as sensors.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Light => "lights",
            Self::Group => "groups",
            Self::Scene => "scenes",
            Self::Sensor | Self::Button | Self::LabsActivator => "sensors",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Group => "group",
            Self::Scene => "scene",
            Self::Sensor => "sensor",
            Self::Button => "button",
            Self::LabsActivator => "labs_activator",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
