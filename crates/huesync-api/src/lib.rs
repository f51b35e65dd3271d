pub mod command;
pub mod config;
pub mod entity;

pub use command::{ColorMode, EntityCommand, LightDelta};
pub use config::{AppConfig, BridgeServer, GroupAttributePolicy, HuesyncConfig, MirrorSet};
pub use entity::EntityType;
