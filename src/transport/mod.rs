pub mod client;
pub mod convert;
#[cfg(test)]
pub mod fake;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use hue::error::HueError;
use hue::legacy_api::ApiShortConfig;
use huesync_api::{EntityCommand, EntityType};

use crate::cache::EntityMap;
use crate::endpoint::BridgeEndpoint;
use crate::model::{AttributeDelta, Update};

pub use client::HueClient;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Hue(#[from] HueError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Bridge error during {action}: {status}: {body}")]
    Status {
        action: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Bridge rejected the application key during {0}")]
    Unauthorized(String),

    #[error("No bridge found at {0}")]
    NotABridge(String),

    #[error("Event stream closed by bridge")]
    StreamClosed,

    #[cfg(test)]
    #[error("Scripted failure: {0}")]
    Scripted(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// One authoritative change read from the event stream.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    pub id: String,
    pub delta: AttributeDelta,
}

impl PushEvent {
    #[must_use]
    pub fn new(id: impl Into<String>, delta: AttributeDelta) -> Self {
        Self {
            id: id.into(),
            delta,
        }
    }

    #[must_use]
    pub fn into_update(self) -> Update {
        Update::push(self.id, self.delta)
    }
}

/// Stream of push events. It may end, or yield an error, at any time.
/// Either way the subscription is dead and must be re-established.
pub type PushStream = BoxStream<'static, TransportResult<PushEvent>>;

/// Network access to one bridge.
///
/// Snapshots are complete and authoritative for their entity type. Push
/// events are authoritative partial updates.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_snapshot(
        &self,
        endpoint: &BridgeEndpoint,
        etype: EntityType,
    ) -> TransportResult<EntityMap>;

    /// Fetch several entity types at once. Fails as a whole if any single
    /// fetch fails.
    async fn fetch_snapshots(
        &self,
        endpoint: &BridgeEndpoint,
        types: &[EntityType],
    ) -> TransportResult<BTreeMap<EntityType, EntityMap>> {
        let mut res = BTreeMap::new();
        for etype in types {
            res.insert(*etype, self.fetch_snapshot(endpoint, *etype).await?);
        }
        Ok(res)
    }

    async fn subscribe(&self, endpoint: &BridgeEndpoint) -> TransportResult<PushStream>;

    async fn send_command(
        &self,
        endpoint: &BridgeEndpoint,
        cmd: &EntityCommand,
    ) -> TransportResult<()>;

    /// Check that a bridge answers at the endpoint's address, without
    /// credentials.
    async fn probe(&self, endpoint: &BridgeEndpoint) -> TransportResult<ApiShortConfig>;
}
