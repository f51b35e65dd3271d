pub mod delta;
pub mod entity;

pub use delta::{
    ActivatorDelta, AttributeDelta, ButtonDelta, EntityUpdate, GroupDelta, Origin, SceneDelta,
    SensorDelta, Update,
};
pub use entity::{
    Button, ButtonAction, ButtonEvent, ColorState, EntityRecord, Group, GroupKind, GroupState,
    LabsActivator, Light, LightState, Scene, SceneKind, Sensor, SensorReading,
};
