use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HuesyncConfig {
    pub request_timeout_secs: u64,
}

impl Default for HuesyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

/// How a member light's color and level are carried onto its groups.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GroupAttributePolicy {
    /// Whichever member changed most recently supplies the group's color
    /// and level.
    #[default]
    LastChangedWins,
    /// Only the bridge's own group action reports update group color.
    BridgeOnly,
}

/// The entity types mirrored from one bridge.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct MirrorSet(BTreeSet<EntityType>);

impl MirrorSet {
    #[must_use]
    pub fn contains(&self, etype: EntityType) -> bool {
        self.0.contains(&etype)
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.0.iter().copied()
    }
}

impl Default for MirrorSet {
    fn default() -> Self {
        Self(EntityType::ALL.into_iter().collect())
    }
}

impl FromIterator<EntityType> for MirrorSet {
    fn from_iter<T: IntoIterator<Item = EntityType>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval() -> u64 {
    30
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct BridgeServer {
    /// Host name or address, optionally with a port.
    pub address: String,
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub bridge_id: Option<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default = "default_true")]
    pub disable_tls_verify: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_true")]
    pub scene_exclusive: bool,
    #[serde(default)]
    pub include_ungrouped_scenes: bool,
    #[serde(default = "default_true")]
    pub scene_off_on_group_off: bool,
    #[serde(default)]
    pub group_attributes: GroupAttributePolicy,
    #[serde(default)]
    pub mirror: MirrorSet,
}

impl BridgeServer {
    /// The periodic poll interval, or `None` when polling is disabled.
    #[must_use]
    pub const fn poll_interval(&self) -> Option<Duration> {
        if self.poll_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.poll_interval_secs))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub huesync: HuesyncConfig,
    #[serde(default)]
    pub bridges: BTreeMap<String, BridgeServer>,
}

impl AppConfig {
    #[must_use]
    pub fn has_bridges(&self) -> bool {
        !self.bridges.is_empty()
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.huesync.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{AppConfig, EntityType, GroupAttributePolicy};

    #[test]
    fn bridge_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"bridges": {"main": {"address": "10.0.0.2", "token": "abc"}}}"#,
        )
        .unwrap();

        let bridge = &cfg.bridges["main"];
        assert!(bridge.use_tls);
        assert!(bridge.push_enabled);
        assert!(bridge.scene_exclusive);
        assert!(!bridge.include_ungrouped_scenes);
        assert_eq!(bridge.group_attributes, GroupAttributePolicy::LastChangedWins);
        assert_eq!(bridge.poll_interval(), Some(Duration::from_secs(30)));
        assert!(EntityType::ALL.iter().all(|t| bridge.mirror.contains(*t)));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_interval_disables_polling() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"bridges": {"main": {
                "address": "10.0.0.2",
                "poll_interval_secs": 0,
                "group_attributes": "bridge_only",
                "mirror": ["light", "group"]
            }}}"#,
        )
        .unwrap();

        let bridge = &cfg.bridges["main"];
        assert_eq!(bridge.poll_interval(), None);
        assert_eq!(bridge.group_attributes, GroupAttributePolicy::BridgeOnly);
        assert!(bridge.mirror.contains(EntityType::Group));
        assert!(!bridge.mirror.contains(EntityType::Scene));
    }
}
