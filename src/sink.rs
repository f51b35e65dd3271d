use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::broadcast;

use huesync_api::EntityType;

use crate::model::{EntityRecord, EntityUpdate};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("No downstream device for {0} {1}")]
    Missing(EntityType, String),

    #[error("Downstream device for {0} {1} rejected update: {2}")]
    Rejected(EntityType, String, String),
}

/// Receiver of entity changes, e.g. the device representations of a home
/// automation system.
///
/// Updates are only sent after deduplication, but receiving the same state
/// twice must still be harmless.
pub trait DeviceSink: Send {
    fn entity_updated(&mut self, update: &EntityUpdate) -> Result<(), SinkError>;
}

/// Hand every update to the sink. A failing target is logged and skipped,
/// the rest are still delivered. Returns the updates that were rejected.
pub fn deliver<'a>(
    name: &str,
    sink: &mut dyn DeviceSink,
    updates: &'a [EntityUpdate],
) -> Vec<&'a EntityUpdate> {
    let mut rejected = vec![];
    for update in updates {
        if let Err(err) = sink.entity_updated(update) {
            log::warn!("[{name}] Skipping update: {err}");
            rejected.push(update);
        }
    }
    rejected
}

/// Publishes updates to any number of listeners.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: broadcast::Sender<EntityUpdate>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntityUpdate> {
        self.tx.subscribe()
    }
}

impl DeviceSink for ChannelSink {
    fn entity_updated(&mut self, update: &EntityUpdate) -> Result<(), SinkError> {
        // no listeners is fine
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}

/// Maps mirrored entities to their downstream device.
///
/// Registration looks up before it creates, so registering the same entity
/// again returns the existing device.
#[derive(Debug)]
pub struct DeviceRegistry<K> {
    devices: BTreeMap<(EntityType, String), K>,
}

impl<K> Default for DeviceRegistry<K> {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }
}

impl<K> DeviceRegistry<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device, and whether it was newly created.
    pub fn register(
        &mut self,
        etype: EntityType,
        id: &str,
        create: impl FnOnce() -> K,
    ) -> (&mut K, bool) {
        let key = (etype, id.to_string());
        let created = !self.devices.contains_key(&key);
        (self.devices.entry(key).or_insert_with(create), created)
    }

    #[must_use]
    pub fn lookup(&self, etype: EntityType, id: &str) -> Option<&K> {
        self.devices.get(&(etype, id.to_string()))
    }

    pub fn lookup_mut(&mut self, etype: EntityType, id: &str) -> Option<&mut K> {
        self.devices.get_mut(&(etype, id.to_string()))
    }

    pub fn remove(&mut self, etype: EntityType, id: &str) -> Option<K> {
        self.devices.remove(&(etype, id.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// A downstream representation of one entity.
pub trait Device: Send {
    fn update(&mut self, state: &EntityRecord) -> Result<(), String>;
}

type DeviceFactory<D> = Box<dyn FnMut(&EntityUpdate) -> D + Send>;

/// Sink that forwards each update to the device registered for it.
///
/// Without a factory, updates for unregistered entities fail with
/// [`SinkError::Missing`]. With one, devices are created on first sight.
pub struct RegistrySink<D: Device> {
    registry: DeviceRegistry<D>,
    factory: Option<DeviceFactory<D>>,
}

impl<D: Device> RegistrySink<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            factory: None,
        }
    }

    #[must_use]
    pub fn auto_register(factory: impl FnMut(&EntityUpdate) -> D + Send + 'static) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            factory: Some(Box::new(factory)),
        }
    }

    pub const fn registry(&self) -> &DeviceRegistry<D> {
        &self.registry
    }

    pub const fn registry_mut(&mut self) -> &mut DeviceRegistry<D> {
        &mut self.registry
    }
}

impl<D: Device> Default for RegistrySink<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> DeviceSink for RegistrySink<D> {
    fn entity_updated(&mut self, update: &EntityUpdate) -> Result<(), SinkError> {
        let etype = update.entity_type;
        let device = match &mut self.factory {
            Some(factory) => self.registry.register(etype, &update.id, || factory(update)).0,
            None => self
                .registry
                .lookup_mut(etype, &update.id)
                .ok_or_else(|| SinkError::Missing(etype, update.id.clone()))?,
        };

        device
            .update(&update.state)
            .map_err(|msg| SinkError::Rejected(etype, update.id.clone(), msg))
    }
}
