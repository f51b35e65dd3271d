use serde::{Deserialize, Serialize};

use crate::entity::EntityType;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Ct,
    Xy,
    Hs,
}

/// A partial set of light attributes.
///
/// Used both for locally issued commands and for authoritative changes
/// reported by the bridge. Unset fields are left untouched when applied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LightDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colormode: Option<ColorMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    /// Transition time in units of 100ms. Only meaningful for commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitiontime: Option<u16>,
}

impl LightDelta {
    #[must_use]
    pub const fn with_on(mut self, on: bool) -> Self {
        self.on = Some(on);
        self
    }

    #[must_use]
    pub const fn with_bri(mut self, bri: u8) -> Self {
        self.bri = Some(bri);
        self
    }

    #[must_use]
    pub const fn with_ct(mut self, ct: u16) -> Self {
        self.ct = Some(ct);
        self.colormode = Some(ColorMode::Ct);
        self
    }

    #[must_use]
    pub const fn with_xy(mut self, xy: [f64; 2]) -> Self {
        self.xy = Some(xy);
        self.colormode = Some(ColorMode::Xy);
        self
    }

    #[must_use]
    pub const fn with_hs(mut self, hue: u16, sat: u8) -> Self {
        self.hue = Some(hue);
        self.sat = Some(sat);
        self.colormode = Some(ColorMode::Hs);
        self
    }

    #[must_use]
    pub const fn with_reachable(mut self, reachable: bool) -> Self {
        self.reachable = Some(reachable);
        self
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.on.is_none()
            && self.bri.is_none()
            && self.hue.is_none()
            && self.sat.is_none()
            && self.ct.is_none()
            && self.xy.is_none()
            && self.colormode.is_none()
            && self.reachable.is_none()
            && self.transitiontime.is_none()
    }

    /// True if the delta carries any level or color attribute.
    #[must_use]
    pub const fn has_color_or_level(&self) -> bool {
        self.bri.is_some()
            || self.hue.is_some()
            || self.sat.is_some()
            || self.ct.is_some()
            || self.xy.is_some()
            || self.colormode.is_some()
    }

    /// Only the level and color part of this delta.
    #[must_use]
    pub const fn color_and_level(&self) -> Self {
        Self {
            on: None,
            bri: self.bri,
            hue: self.hue,
            sat: self.sat,
            ct: self.ct,
            xy: self.xy,
            colormode: self.colormode,
            reachable: None,
            transitiontime: None,
        }
    }

    /// Fold a later delta into this one. Fields set in `later` win.
    pub fn merge(&mut self, later: &Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(
                    if later.$field.is_some() {
                        self.$field = later.$field;
                    }
                )*
            };
        }
        take!(on, bri, hue, sat, ct, xy, colormode, reachable, transitiontime);
    }
}

/// A command issued locally against a mirrored entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityCommand {
    Light {
        id: String,
        delta: LightDelta,
    },
    Group {
        id: String,
        delta: LightDelta,
    },
    /// Recall a scene. `group` is the scene's owning group, resolved from the
    /// mirror when not given.
    ActivateScene {
        id: String,
        group: Option<String>,
    },
    LabsActivator {
        id: String,
        active: bool,
    },
}

impl EntityCommand {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Light { .. } => EntityType::Light,
            Self::Group { .. } => EntityType::Group,
            Self::ActivateScene { .. } => EntityType::Scene,
            Self::LabsActivator { .. } => EntityType::LabsActivator,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Light { id, .. }
            | Self::Group { id, .. }
            | Self::ActivateScene { id, .. }
            | Self::LabsActivator { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ColorMode, EntityCommand, EntityType, LightDelta};

    #[test]
    fn merge_prefers_later_fields() {
        let mut first = LightDelta::default().with_on(true).with_bri(10);
        first.merge(&LightDelta::default().with_bri(200).with_ct(300));

        assert_eq!(first.on, Some(true));
        assert_eq!(first.bri, Some(200));
        assert_eq!(first.ct, Some(300));
        assert_eq!(first.colormode, Some(ColorMode::Ct));
    }

    #[test]
    fn color_and_level_strips_switching() {
        let delta = LightDelta::default()
            .with_on(false)
            .with_xy([0.3, 0.4])
            .with_reachable(true);
        let color = delta.color_and_level();

        assert!(color.on.is_none());
        assert!(color.reachable.is_none());
        assert_eq!(color.xy, Some([0.3, 0.4]));
        assert!(color.has_color_or_level());
        assert!(!LightDelta::default().with_on(true).has_color_or_level());
    }

    #[test]
    fn empty_delta_serializes_to_empty_object() {
        let delta = LightDelta::default();
        assert!(delta.is_empty());
        assert_eq!(serde_json::to_string(&delta).unwrap(), "{}");
    }

    #[test]
    fn command_reports_target() {
        let cmd = EntityCommand::ActivateScene {
            id: "abc".into(),
            group: None,
        };
        assert_eq!(cmd.entity_type(), EntityType::Scene);
        assert_eq!(cmd.id(), "abc");
    }
}
