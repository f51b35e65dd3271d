use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, stream};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use hue::error::HueError;
use hue::legacy_api::{
    ApiGroup, ApiGroupActionUpdate, ApiGroupUpdate, ApiLight, ApiScene, ApiSensor,
    ApiSensorStateUpdate, ApiShortConfig, Collection, HueApiError, HueApiResult,
};
use hue::sse::SseDecoder;
use hue::{APPLICATION_KEY_HEADER, EVENTSTREAM_PATH};
use huesync_api::{BridgeServer, EntityCommand, EntityType};

use crate::cache::EntityMap;
use crate::endpoint::BridgeEndpoint;
use crate::error::ApiResult;
use crate::model::{EntityRecord, Group};
use crate::transport::{PushEvent, PushStream, Transport, TransportError, TransportResult, convert};

/// Legacy REST and event stream client for one bridge.
pub struct HueClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl HueClient {
    pub fn new(server: &BridgeServer, timeout: Duration) -> ApiResult<Self> {
        // no client-wide timeout: it would also cut the event stream
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(server.disable_tls_verify)
            .build()?;

        Ok(Self { http, timeout })
    }

    fn api_url(endpoint: &BridgeEndpoint, path: &str) -> TransportResult<Url> {
        let base = endpoint.base_url().map_err(|_| {
            TransportError::NotABridge(endpoint.address.clone())
        })?;
        Ok(base.join(&format!("api/{}/{path}", endpoint.token))?)
    }

    async fn check_status(
        response: reqwest::Response,
        action: &str,
    ) -> TransportResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized(action.to_string()));
        }

        let body = response.text().await.unwrap_or_else(|_| String::new());
        Err(TransportError::Status {
            action: action.to_string(),
            status,
            body,
        })
    }

    /// The legacy api reports errors with a success status code, so the
    /// reply body has to be inspected too.
    fn bridge_error(err: HueError, action: &str) -> TransportError {
        match err {
            HueError::BridgeError { typ, .. } if typ == HueApiError::UNAUTHORIZED_USER => {
                TransportError::Unauthorized(action.to_string())
            }
            err => TransportError::Hue(err),
        }
    }

    async fn get_collection<T: DeserializeOwned>(
        &self,
        endpoint: &BridgeEndpoint,
        collection: &str,
    ) -> TransportResult<BTreeMap<String, T>> {
        let action = format!("GET /{collection}");
        let url = Self::api_url(endpoint, collection)?;
        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let response = Self::check_status(response, &action).await?;
        let value: Value = response.json().await?;

        let coll =
            Collection::<T>::decode(value).map_err(|err| Self::bridge_error(err, &action))?;
        for (id, err) in &coll.rejected {
            log::warn!(
                "[{}] Skipping {collection}/{id}, unexpected format: {err}",
                endpoint.name
            );
        }
        log::debug!(
            "[{}] Fetched {} {collection}",
            endpoint.name,
            coll.items.len()
        );
        Ok(coll.items)
    }

    async fn put<B: Serialize + Sync>(
        &self,
        endpoint: &BridgeEndpoint,
        path: &str,
        body: &B,
    ) -> TransportResult<()> {
        let action = format!("PUT /{path}");
        let url = Self::api_url(endpoint, path)?;
        let response = self
            .http
            .put(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(response, &action).await?;

        let replies: Vec<HueApiResult<Value>> = response.json().await?;
        for reply in replies {
            reply
                .into_result()
                .map_err(|err| Self::bridge_error(err, &action))?;
        }
        Ok(())
    }

    async fn fetch_sensors(
        &self,
        endpoint: &BridgeEndpoint,
    ) -> TransportResult<BTreeMap<EntityType, EntityMap>> {
        let items = self.get_collection::<ApiSensor>(endpoint, "sensors").await?;
        Ok(convert::sensors(items))
    }

    const fn is_sensor_backed(etype: EntityType) -> bool {
        matches!(
            etype,
            EntityType::Sensor | EntityType::Button | EntityType::LabsActivator
        )
    }
}

#[async_trait]
impl Transport for HueClient {
    async fn fetch_snapshot(
        &self,
        endpoint: &BridgeEndpoint,
        etype: EntityType,
    ) -> TransportResult<EntityMap> {
        let res: EntityMap = match etype {
            EntityType::Light => self
                .get_collection::<ApiLight>(endpoint, etype.collection())
                .await?
                .into_iter()
                .map(|(id, api)| (id, convert::light(api).into()))
                .collect(),
            EntityType::Group => self
                .get_collection::<ApiGroup>(endpoint, etype.collection())
                .await?
                .into_iter()
                .map(|(id, api)| {
                    let group: Group = convert::group(&id, api);
                    (id, group.into())
                })
                .collect(),
            EntityType::Scene => self
                .get_collection::<ApiScene>(endpoint, etype.collection())
                .await?
                .into_iter()
                .map(|(id, api)| (id, EntityRecord::from(convert::scene(api))))
                .collect(),
            EntityType::Sensor | EntityType::Button | EntityType::LabsActivator => self
                .fetch_sensors(endpoint)
                .await?
                .remove(&etype)
                .unwrap_or_default(),
        };
        Ok(res)
    }

    /// Like the default, but reads the sensors collection only once for
    /// all the entity types derived from it.
    async fn fetch_snapshots(
        &self,
        endpoint: &BridgeEndpoint,
        types: &[EntityType],
    ) -> TransportResult<BTreeMap<EntityType, EntityMap>> {
        let mut res = BTreeMap::new();
        let mut sensors = None;

        for etype in types {
            if Self::is_sensor_backed(*etype) {
                if sensors.is_none() {
                    sensors = Some(self.fetch_sensors(endpoint).await?);
                }
                let records = sensors
                    .as_mut()
                    .and_then(|all| all.remove(etype))
                    .unwrap_or_default();
                res.insert(*etype, records);
            } else {
                res.insert(*etype, self.fetch_snapshot(endpoint, *etype).await?);
            }
        }
        Ok(res)
    }

    async fn subscribe(&self, endpoint: &BridgeEndpoint) -> TransportResult<PushStream> {
        let url = endpoint
            .base_url()
            .map_err(|_| TransportError::NotABridge(endpoint.address.clone()))?
            .join(EVENTSTREAM_PATH.trim_start_matches('/'))?;

        let response = self
            .http
            .get(url)
            .header(APPLICATION_KEY_HEADER, &endpoint.token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check_status(response, "GET /eventstream").await?;
        log::info!("[{}] Event stream connected", endpoint.name);

        let body: BoxStream<'static, reqwest::Result<Bytes>> =
            response.bytes_stream().boxed();
        let state = (
            body,
            SseDecoder::new(),
            VecDeque::<PushEvent>::new(),
            endpoint.name.clone(),
        );

        let events = stream::unfold(state, |(mut body, mut decoder, mut queue, name)| async move {
            loop {
                if let Some(event) = queue.pop_front() {
                    return Some((Ok(event), (body, decoder, queue, name)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => match decoder.feed(&chunk) {
                        Ok(messages) => {
                            for msg in messages {
                                queue.extend(convert::push_events(&name, &msg.data));
                            }
                        }
                        Err(err) => {
                            let state = (body, decoder, queue, name);
                            return Some((Err(TransportError::from(err)), state));
                        }
                    },
                    Some(Err(err)) => {
                        let state = (body, decoder, queue, name);
                        return Some((Err(TransportError::from(err)), state));
                    }
                    None => return None,
                }
            }
        });

        Ok(events.boxed())
    }

    async fn send_command(
        &self,
        endpoint: &BridgeEndpoint,
        cmd: &EntityCommand,
    ) -> TransportResult<()> {
        match cmd {
            EntityCommand::Light { id, delta } => {
                let body = convert::light_update(delta);
                self.put(endpoint, &format!("lights/{id}/state"), &body)
                    .await
            }
            EntityCommand::Group { id, delta } => {
                let body = ApiGroupActionUpdate::LightUpdate(convert::light_update(delta));
                self.put(endpoint, &format!("groups/{id}/action"), &body)
                    .await
            }
            EntityCommand::ActivateScene { id, group } => {
                let group = group.as_deref().unwrap_or(Group::ALL_LIGHTS_ID);
                let body = ApiGroupActionUpdate::GroupUpdate(ApiGroupUpdate { scene: id.clone() });
                self.put(endpoint, &format!("groups/{group}/action"), &body)
                    .await
            }
            EntityCommand::LabsActivator { id, active } => {
                let body = ApiSensorStateUpdate {
                    status: Some(i32::from(*active)),
                    flag: None,
                };
                self.put(endpoint, &format!("sensors/{id}/state"), &body)
                    .await
            }
        }
    }

    async fn probe(&self, endpoint: &BridgeEndpoint) -> TransportResult<ApiShortConfig> {
        let not_a_bridge = || TransportError::NotABridge(endpoint.address.clone());

        let url = endpoint
            .base_url()
            .map_err(|_| not_a_bridge())?
            .join("api/config")?;
        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let response = Self::check_status(response, "GET /api/config").await?;
        let value: Value = response.json().await.map_err(|_| not_a_bridge())?;

        serde_json::from_value(value).map_err(|_| not_a_bridge())
    }
}
