use std::collections::{BTreeMap, BTreeSet};
use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use huesync_api::{BridgeServer, EntityCommand, EntityType, MirrorSet};

use crate::cache::EntityMap;
use crate::discovery::EndpointProvider;
use crate::endpoint::BridgeEndpoint;
use crate::error::{ApiError, ApiResult};
use crate::model::{EntityRecord, EntityUpdate, Update};
use crate::propagate::{PropagatorOptions, StatePropagator};
use crate::scheduler::{ExponentialBackoff, PollPhase, PollScheduler};
use crate::sink::{self, DeviceSink};
use crate::transport::{PushEvent, PushStream, Transport, TransportResult};

/// Poll and push settings that can be changed while a session runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub poll_interval: Option<Duration>,
    pub push_enabled: bool,
}

impl From<&BridgeServer> for ScheduleSettings {
    fn from(server: &BridgeServer) -> Self {
        Self {
            poll_interval: server.poll_interval(),
            push_enabled: server.push_enabled,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub endpoint: BridgeEndpoint,
    pub phase: PollPhase,
    pub poll_interval_secs: Option<u64>,
    pub push_connected: bool,
    pub populated: Vec<EntityType>,
}

#[derive(Debug)]
pub enum SessionRequest {
    Command(EntityCommand, oneshot::Sender<ApiResult<()>>),
    Get {
        etype: EntityType,
        id: String,
        reply: oneshot::Sender<ApiResult<EntityRecord>>,
    },
    All {
        etype: EntityType,
        reply: oneshot::Sender<ApiResult<EntityMap>>,
    },
    Status(oneshot::Sender<SessionStatus>),
    Refresh,
    ClearCache(EntityType),
    Reconfigure(ScheduleSettings),
}

/// Cloneable access to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    name: String,
    tx: mpsc::Sender<SessionRequest>,
    cancel: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn closed(&self) -> ApiError {
        ApiError::SessionClosed(self.name.clone())
    }

    async fn send(&self, req: SessionRequest) -> ApiResult<()> {
        self.tx.send(req).await.map_err(|_| self.closed())
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> SessionRequest) -> ApiResult<R> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Apply a command locally, then send it to the bridge. Resolves once
    /// the bridge has answered.
    pub async fn command(&self, cmd: EntityCommand) -> ApiResult<()> {
        self.request(|reply| SessionRequest::Command(cmd, reply))
            .await?
    }

    pub async fn get(&self, etype: EntityType, id: impl Into<String>) -> ApiResult<EntityRecord> {
        let id = id.into();
        self.request(|reply| SessionRequest::Get { etype, id, reply })
            .await?
    }

    pub async fn all(&self, etype: EntityType) -> ApiResult<EntityMap> {
        self.request(|reply| SessionRequest::All { etype, reply })
            .await?
    }

    pub async fn status(&self) -> ApiResult<SessionStatus> {
        self.request(SessionRequest::Status).await
    }

    pub async fn refresh(&self) -> ApiResult<()> {
        self.send(SessionRequest::Refresh).await
    }

    pub async fn clear_cache(&self, etype: EntityType) -> ApiResult<()> {
        self.send(SessionRequest::ClearCache(etype)).await
    }

    pub async fn reconfigure(&self, settings: ScheduleSettings) -> ApiResult<()> {
        self.send(SessionRequest::Reconfigure(settings)).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn next_push(push: &mut Option<PushStream>) -> Option<TransportResult<PushEvent>> {
    match push {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

/// Resolves with the new address, or `None` once the provider is gone.
async fn address_changed(rx: &mut Option<watch::Receiver<String>>) -> Option<String> {
    let Some(rx) = rx else {
        return future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some(rx.borrow_and_update().clone()),
        Err(_) => None,
    }
}

/// Everything known about one paired bridge, driven by a single task.
///
/// Polls, push events, commands and queries are handled one at a time, so
/// each update is fully applied and fanned out before the next one starts.
pub struct BridgeEndpointSession<T: Transport, S: DeviceSink> {
    name: String,
    endpoint: BridgeEndpoint,
    mirror: MirrorSet,
    settings: ScheduleSettings,
    propagator: StatePropagator,
    scheduler: PollScheduler,
    transport: T,
    sink: S,
    discovery: Arc<dyn EndpointProvider>,
    push: Option<PushStream>,
    push_backoff: ExponentialBackoff,
    push_retry: Option<Instant>,
    rx: mpsc::Receiver<SessionRequest>,
    cancel: CancellationToken,
}

impl<T: Transport, S: DeviceSink> BridgeEndpointSession<T, S> {
    const QUEUE_SIZE: usize = 32;

    pub fn new(
        name: &str,
        server: &BridgeServer,
        transport: T,
        sink: S,
        discovery: Arc<dyn EndpointProvider>,
    ) -> ApiResult<(Self, SessionHandle)> {
        let endpoint = discovery.current_endpoint().ok_or_else(|| {
            ApiError::service_error(format!("[{name}] No bridge endpoint available"))
        })?;

        let (tx, rx) = mpsc::channel(Self::QUEUE_SIZE);
        let cancel = CancellationToken::new();
        let settings = ScheduleSettings::from(server);

        let session = Self {
            name: name.to_string(),
            endpoint,
            mirror: server.mirror.clone(),
            settings,
            propagator: StatePropagator::new(name, PropagatorOptions::from(server)),
            scheduler: PollScheduler::new(settings.poll_interval),
            transport,
            sink,
            discovery,
            push: None,
            push_backoff: ExponentialBackoff::default(),
            push_retry: None,
            rx,
            cancel: cancel.clone(),
        };

        let handle = SessionHandle {
            name: name.to_string(),
            tx,
            cancel,
        };

        Ok((session, handle))
    }

    /// Fan updates out to the sink. Rejected ones are sent again the next
    /// time their entity is checked.
    fn deliver(&mut self, updates: &[EntityUpdate]) {
        for update in sink::deliver(&self.name, &mut self.sink, updates) {
            self.propagator
                .forget_emitted(update.entity_type, &update.id);
        }
    }

    fn mirrored(&self) -> Vec<EntityType> {
        self.mirror.iter().collect()
    }

    fn apply_snapshots(&mut self, snapshots: BTreeMap<EntityType, EntityMap>) {
        for (etype, records) in snapshots {
            if !self.propagator.is_populated(etype) {
                log::info!("[{}] Loaded {} {etype} entities", self.name, records.len());
            }
            let updates = self.propagator.apply_snapshot(etype, records);
            self.deliver(&updates);
        }
    }

    /// One full reconciliation cycle over every mirrored type.
    ///
    /// All snapshots are fetched before any is applied, so a failure part
    /// way through leaves the cache exactly as it was.
    async fn poll_cycle(&mut self) {
        if !self.scheduler.begin() {
            return;
        }

        let types = self.mirrored();
        log::debug!("[{}] Polling {}", self.name, types.iter().join(", "));

        match self.transport.fetch_snapshots(&self.endpoint, &types).await {
            Ok(snapshots) => {
                self.scheduler.fetched();
                self.apply_snapshots(snapshots);
                self.scheduler.applied(Instant::now(), &mut self.endpoint);
            }
            Err(err) => {
                log::warn!("[{}] Poll failed: {err}", self.name);
                self.scheduler.failed(Instant::now(), &mut self.endpoint);
            }
        }
    }

    /// Fetch selected types outside the regular cycle.
    async fn refetch(&mut self, types: BTreeSet<EntityType>) -> ApiResult<()> {
        let types: Vec<EntityType> = types
            .into_iter()
            .filter(|etype| self.mirror.contains(*etype))
            .collect();
        if types.is_empty() {
            return Ok(());
        }

        log::debug!("[{}] Fetching {}", self.name, types.iter().join(", "));
        match self.transport.fetch_snapshots(&self.endpoint, &types).await {
            Ok(snapshots) => {
                self.scheduler
                    .record_contact(Instant::now(), &mut self.endpoint);
                self.apply_snapshots(snapshots);
                Ok(())
            }
            Err(err) => {
                log::warn!("[{}] Fetch failed: {err}", self.name);
                self.scheduler.record_failure(&mut self.endpoint);
                Err(err.into())
            }
        }
    }

    /// Make sure a type can be read, fetching it first if it was cleared.
    async fn ensure_populated(&mut self, etype: EntityType) -> ApiResult<()> {
        let mut needed = BTreeSet::from([etype]);
        // group state is derived from lights
        if etype == EntityType::Group {
            needed.insert(EntityType::Light);
        }
        needed.retain(|etype| !self.propagator.is_populated(*etype));
        self.refetch(needed).await
    }

    async fn command(&mut self, mut cmd: EntityCommand) -> ApiResult<()> {
        if let EntityCommand::ActivateScene { id, group } = &mut cmd {
            if group.is_none() {
                *group = self.propagator.scene_group(id);
            }
        }

        // local state first, so a poll reply arriving later wins
        let updates = self.propagator.apply(Update::from_command(&cmd));
        self.deliver(&updates);

        match self.transport.send_command(&self.endpoint, &cmd).await {
            Ok(()) => {
                self.scheduler
                    .record_contact(Instant::now(), &mut self.endpoint);
                Ok(())
            }
            Err(err) => {
                log::warn!(
                    "[{}] Command for {} {} failed: {err}",
                    self.name,
                    cmd.entity_type(),
                    cmd.id()
                );
                self.scheduler.record_failure(&mut self.endpoint);
                Err(err.into())
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            endpoint: self.endpoint.clone(),
            phase: self.scheduler.phase(),
            poll_interval_secs: self.scheduler.interval().map(|interval| interval.as_secs()),
            push_connected: self.push.is_some(),
            populated: EntityType::ALL
                .into_iter()
                .filter(|etype| self.propagator.is_populated(*etype))
                .collect(),
        }
    }

    fn reconfigure(&mut self, settings: ScheduleSettings) {
        log::info!("[{}] Reconfigured: {settings:?}", self.name);
        self.scheduler
            .set_interval(Instant::now(), settings.poll_interval);

        if !settings.push_enabled {
            if self.push.take().is_some() {
                log::info!("[{}] Event stream disconnected", self.name);
            }
            self.push_retry = None;
        } else if !self.settings.push_enabled {
            self.push_backoff.reset();
            self.push_retry = Some(Instant::now());
        }

        self.settings = settings;
    }

    async fn handle_request(&mut self, req: SessionRequest) {
        match req {
            SessionRequest::Command(cmd, reply) => {
                let res = self.command(cmd).await;
                let _ = reply.send(res);
            }
            SessionRequest::Get { etype, id, reply } => {
                let res = match self.ensure_populated(etype).await {
                    Ok(()) => self.propagator.get(etype, &id).map_err(ApiError::from),
                    Err(err) => Err(err),
                };
                let _ = reply.send(res);
            }
            SessionRequest::All { etype, reply } => {
                let res = match self.ensure_populated(etype).await {
                    Ok(()) => self.propagator.all(etype).map_err(ApiError::from),
                    Err(err) => Err(err),
                };
                let _ = reply.send(res);
            }
            SessionRequest::Status(reply) => {
                let _ = reply.send(self.status());
            }
            SessionRequest::Refresh => {
                log::debug!("[{}] Refresh requested", self.name);
                self.scheduler.preempt(Instant::now());
            }
            SessionRequest::ClearCache(etype) => {
                self.propagator.clear(etype);
                let types = self.propagator.take_refresh_requests();
                if let Err(err) = self.refetch(types).await {
                    log::warn!("[{}] Could not reload {etype}: {err}", self.name);
                }
            }
            SessionRequest::Reconfigure(settings) => self.reconfigure(settings),
        }
    }

    fn schedule_push_retry(&mut self) {
        if !self.settings.push_enabled {
            return;
        }
        let delay = self.push_backoff.next_delay();
        log::info!(
            "[{}] Reconnecting event stream in {}s",
            self.name,
            delay.as_secs()
        );
        self.push_retry = Some(Instant::now() + delay);
    }

    async fn connect_push(&mut self) {
        self.push_retry = None;
        if !self.settings.push_enabled || self.push.is_some() {
            return;
        }

        match self.transport.subscribe(&self.endpoint).await {
            Ok(stream) => {
                self.push = Some(stream);
                self.push_backoff.reset();
                self.scheduler
                    .record_contact(Instant::now(), &mut self.endpoint);
            }
            Err(err) => {
                log::warn!("[{}] Event stream connect failed: {err}", self.name);
                self.scheduler.record_failure(&mut self.endpoint);
                self.schedule_push_retry();
            }
        }
    }

    fn handle_push(&mut self, item: Option<TransportResult<PushEvent>>) {
        match item {
            Some(Ok(event)) => {
                self.scheduler
                    .record_contact(Instant::now(), &mut self.endpoint);
                let updates = self.propagator.apply(event.into_update());
                self.deliver(&updates);
            }
            Some(Err(err)) => {
                log::warn!("[{}] Event stream failed: {err}", self.name);
                self.push = None;
                self.scheduler.record_failure(&mut self.endpoint);
                self.schedule_push_retry();
            }
            None => {
                log::warn!("[{}] Event stream closed", self.name);
                self.push = None;
                self.schedule_push_retry();
            }
        }
    }

    /// Follow the bridge to a new address, after checking it is the same
    /// bridge.
    async fn handle_address_change(&mut self, address: String) {
        if address == self.endpoint.address {
            return;
        }

        let candidate = BridgeEndpoint {
            address,
            ..self.endpoint.clone()
        };

        let config = match self.transport.probe(&candidate).await {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "[{}] Ignoring address {}: {err}",
                    self.name,
                    candidate.address
                );
                return;
            }
        };

        if let Some(expected) = &self.endpoint.bridge_id {
            if !config.matches_bridge_id(expected) {
                log::warn!(
                    "[{}] Ignoring address {}: found bridge {}, expected {expected}",
                    self.name,
                    candidate.address,
                    config.bridgeid
                );
                return;
            }
        }

        log::info!(
            "[{}] Bridge {} moved from {} to {}",
            self.name,
            config.bridgeid,
            self.endpoint.address,
            candidate.address
        );
        self.endpoint.address = candidate.address;
        self.endpoint.bridge_id.get_or_insert(config.bridgeid);

        // the old stream talks to the old address
        self.push = None;
        self.push_backoff.reset();
        if self.settings.push_enabled {
            self.push_retry = Some(Instant::now());
        }
        self.scheduler.preempt(Instant::now());
    }

    /// Fetch every mirrored type once. Used for one-shot runs.
    pub async fn refresh_once(&mut self) -> ApiResult<()> {
        let types = self.mirrored();
        let snapshots = match self.transport.fetch_snapshots(&self.endpoint, &types).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                self.scheduler.record_failure(&mut self.endpoint);
                return Err(err.into());
            }
        };
        self.scheduler
            .record_contact(Instant::now(), &mut self.endpoint);
        self.apply_snapshots(snapshots);
        Ok(())
    }

    /// The current view of every populated type.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<EntityType, EntityMap> {
        EntityType::ALL
            .into_iter()
            .filter_map(|etype| Some((etype, self.propagator.all(etype).ok()?)))
            .collect()
    }

    pub async fn run(mut self) -> ApiResult<()> {
        log::info!(
            "[{}] Starting session for bridge at {}",
            self.name,
            self.endpoint.address
        );

        let cancel = self.cancel.clone();
        let mut address_rx = Some(self.discovery.address_changes());

        let now = Instant::now();
        self.scheduler.preempt(now);
        if self.settings.push_enabled {
            self.push_retry = Some(now);
        }

        loop {
            let poll_due = self.scheduler.next_due();
            let push_due = self.push_retry;

            tokio::select! {
                () = cancel.cancelled() => break,
                req = self.rx.recv() => {
                    let Some(req) = req else {
                        log::debug!("[{}] All handles dropped", self.name);
                        break;
                    };
                    self.handle_request(req).await;
                }
                item = next_push(&mut self.push) => self.handle_push(item),
                () = sleep_until_opt(poll_due) => self.poll_cycle().await,
                () = sleep_until_opt(push_due) => self.connect_push().await,
                address = address_changed(&mut address_rx) => match address {
                    Some(address) => self.handle_address_change(address).await,
                    None => address_rx = None,
                },
            }
        }

        self.push = None;
        log::info!("[{}] Session stopped", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use maplit::btreemap;
    use serde_json::json;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    use huesync_api::{BridgeServer, EntityCommand, EntityType, LightDelta};

    use crate::discovery::StaticDiscovery;
    use crate::endpoint::{BridgeEndpoint, Connectivity};
    use crate::error::ApiResult;
    use crate::model::{
        AttributeDelta, EntityRecord, EntityUpdate, Group, GroupKind, GroupState, Light,
        LightState, Scene, SceneKind,
    };
    use crate::scheduler::PollPhase;
    use crate::session::{BridgeEndpointSession, ScheduleSettings, SessionHandle};
    use crate::sink::{ChannelSink, DeviceSink, SinkError};
    use crate::transport::PushEvent;
    use crate::transport::fake::FakeTransport;

    struct Harness {
        fake: FakeTransport,
        discovery: Arc<StaticDiscovery>,
        handle: SessionHandle,
        updates: broadcast::Receiver<EntityUpdate>,
        task: JoinHandle<ApiResult<()>>,
    }

    fn server(extra: serde_json::Value) -> BridgeServer {
        let mut base = json!({
            "address": "10.0.0.2",
            "token": "key",
            "bridge_id": "001788fffe000001",
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    fn light(on: bool) -> EntityRecord {
        EntityRecord::Light(Light {
            name: "light".into(),
            model: "LCT015".into(),
            state: LightState {
                on,
                reachable: true,
                color: Default::default(),
            },
        })
    }

    fn scene(group: &str) -> EntityRecord {
        EntityRecord::Scene(Scene {
            name: "scene".into(),
            kind: SceneKind::GroupScene,
            group: Some(group.into()),
            lights: vec![],
            active: false,
        })
    }

    fn populated_fake() -> FakeTransport {
        let fake = FakeTransport::new();
        fake.set_snapshot(
            EntityType::Light,
            btreemap! {"1".into() => light(false), "2".into() => light(false)},
        );
        fake.set_snapshot(
            EntityType::Group,
            btreemap! {
                "1".into() => EntityRecord::Group(Group {
                    name: "Kitchen".into(),
                    kind: GroupKind::Room,
                    members: vec!["1".into(), "2".into()],
                    state: GroupState::default(),
                }),
            },
        );
        fake.set_snapshot(
            EntityType::Scene,
            btreemap! {"a".into() => scene("1"), "b".into() => scene("1")},
        );
        fake
    }

    fn start(server: &BridgeServer, fake: &FakeTransport) -> Harness {
        let endpoint = BridgeEndpoint::from_config("test", server, "key");
        let discovery = Arc::new(StaticDiscovery::new(endpoint));
        let sink = ChannelSink::new(256);
        let updates = sink.subscribe();

        let (session, handle) = BridgeEndpointSession::new(
            "test",
            server,
            fake.clone(),
            sink,
            discovery.clone(),
        )
        .unwrap();

        Harness {
            fake: fake.clone(),
            discovery,
            handle,
            updates,
            task: tokio::spawn(session.run()),
        }
    }

    /// Let the session task run until it is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<EntityUpdate>) -> Vec<(EntityType, String)> {
        let mut res = vec![];
        while let Ok(update) = rx.try_recv() {
            res.push((update.entity_type, update.id));
        }
        res
    }

    async fn light_on(handle: &SessionHandle, id: &str) -> bool {
        match handle.get(EntityType::Light, id).await {
            Ok(EntityRecord::Light(light)) => light.state.on,
            other => panic!("light {id} not available: {other:?}"),
        }
    }

    fn short_config(bridgeid: &str) -> hue::legacy_api::ApiShortConfig {
        serde_json::from_value(json!({
            "name": "Hue Bridge",
            "bridgeid": bridgeid,
            "modelid": "BSB002",
            "apiversion": "1.65.0",
            "swversion": "1965111030",
            "mac": "00:17:88:00:00:01",
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn startup_populates_everything() {
        let mut h = start(&server(json!({})), &populated_fake());
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.phase, PollPhase::Idle);
        assert_eq!(status.endpoint.status, Connectivity::Online);
        assert_eq!(status.endpoint.failures, 0);
        assert!(status.push_connected);
        assert_eq!(status.populated, EntityType::ALL.to_vec());
        assert_eq!(status.poll_interval_secs, Some(30));

        let emitted = drain(&mut h.updates);
        assert!(emitted.contains(&(EntityType::Light, "2".into())));
        assert!(emitted.contains(&(EntityType::Group, "0".into())));
        assert!(emitted.contains(&(EntityType::Scene, "b".into())));

        assert_eq!(h.handle.all(EntityType::Light).await.unwrap().len(), 2);
        assert_eq!(h.fake.fetch_count(EntityType::Light), 1);
        assert_eq!(h.fake.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_is_optimistic_until_push_arrives() {
        let mut h = start(&server(json!({})), &populated_fake());
        settle().await;
        drain(&mut h.updates);

        let cmd = EntityCommand::Light {
            id: "1".into(),
            delta: LightDelta::default().with_on(true),
        };
        h.handle.command(cmd.clone()).await.unwrap();

        assert_eq!(h.fake.commands(), vec![cmd]);
        assert!(light_on(&h.handle, "1").await);
        let emitted = drain(&mut h.updates);
        assert_eq!(
            emitted,
            vec![
                (EntityType::Light, "1".into()),
                (EntityType::Group, "0".into()),
                (EntityType::Group, "1".into()),
            ]
        );

        assert!(h.fake.push(PushEvent::new(
            "1",
            AttributeDelta::Light(LightDelta::default().with_on(false))
        )));
        settle().await;
        assert!(!light_on(&h.handle, "1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn scene_command_gets_owning_group() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;

        h.handle
            .command(EntityCommand::ActivateScene {
                id: "a".into(),
                group: None,
            })
            .await
            .unwrap();
        h.handle
            .command(EntityCommand::ActivateScene {
                id: "b".into(),
                group: None,
            })
            .await
            .unwrap();

        assert_eq!(
            h.fake.commands()[1],
            EntityCommand::ActivateScene {
                id: "b".into(),
                group: Some("1".into()),
            }
        );
        let Ok(EntityRecord::Scene(a)) = h.handle.get(EntityType::Scene, "a").await else {
            panic!("scene a missing");
        };
        assert!(!a.active);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_marks_offline_until_next_poll() {
        let h = start(&server(json!({"push_enabled": false})), &populated_fake());
        settle().await;

        h.fake.fail_next_commands(1);
        let cmd = EntityCommand::Light {
            id: "2".into(),
            delta: LightDelta::default().with_on(true),
        };
        assert!(h.handle.command(cmd).await.is_err());

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.endpoint.failures, 1);
        assert_eq!(status.endpoint.status, Connectivity::Offline);
        // stale but available
        assert!(light_on(&h.handle, "2").await);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.endpoint.failures, 0);
        assert!(status.endpoint.is_online());
        assert!(!light_on(&h.handle, "2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_back_off() {
        let fake = populated_fake();
        fake.fail_next_fetches(3);
        let h = start(&server(json!({"push_enabled": false})), &fake);
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.phase, PollPhase::Failed);
        assert_eq!(status.endpoint.failures, 1);
        assert!(status.populated.is_empty());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.handle.status().await.unwrap().endpoint.failures, 2);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.handle.status().await.unwrap().endpoint.failures, 3);

        // third failure moves to the ten minute tier
        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(h.handle.status().await.unwrap().endpoint.failures, 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.endpoint.failures, 0);
        assert_eq!(status.phase, PollPhase::Idle);
        assert_eq!(fake.fetch_count(EntityType::Light), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn push_reconnects_with_backoff() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;
        assert_eq!(h.fake.subscriptions(), 1);

        h.fake.close_push();
        settle().await;
        assert_eq!(h.fake.subscriptions(), 1);
        assert!(!h.handle.status().await.unwrap().push_connected);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.fake.subscriptions(), 2);
        assert!(h.fake.is_subscribed());

        assert!(h.fake.push_error());
        settle().await;
        assert_eq!(h.handle.status().await.unwrap().endpoint.failures, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.fake.subscriptions(), 3);
        assert_eq!(h.handle.status().await.unwrap().endpoint.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_retried() {
        let fake = populated_fake();
        fake.fail_subscribe(true);
        let h = start(&server(json!({})), &fake);
        settle().await;

        assert_eq!(fake.subscriptions(), 1);
        assert!(!h.handle.status().await.unwrap().push_connected);

        fake.fail_subscribe(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fake.subscriptions(), 2);
        assert!(h.handle.status().await.unwrap().push_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_cache_is_refetched_before_reads() {
        let mut h = start(&server(json!({})), &populated_fake());
        settle().await;
        drain(&mut h.updates);

        h.fake.fail_next_fetches(2);
        h.handle.clear_cache(EntityType::Light).await.unwrap();

        // both the reload and the read-triggered fetch fail: nothing stale
        assert!(h.handle.get(EntityType::Light, "1").await.is_err());
        assert!(
            !h.handle
                .status()
                .await
                .unwrap()
                .populated
                .contains(&EntityType::Light)
        );

        // reading a group needs lights, which are fetched first
        assert!(h.handle.get(EntityType::Group, "1").await.is_ok());
        assert_eq!(h.fake.fetch_count(EntityType::Light), 4);
        assert_eq!(h.fake.fetch_count(EntityType::Group), 1);
        assert!(!light_on(&h.handle, "1").await);

        // identical data was already delivered once
        assert!(drain(&mut h.updates).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_bridge_to_new_address() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;

        h.fake.set_probe(Some(short_config("001788FFFE000001")));
        h.discovery.notify_address_change("10.0.0.9");
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.endpoint.address, "10.0.0.9");
        assert_eq!(h.fake.probed(), vec!["10.0.0.9".to_string()]);
        assert_eq!(h.fake.fetch_count(EntityType::Light), 2);
        assert_eq!(h.fake.subscriptions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_different_bridge() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;

        h.fake.set_probe(Some(short_config("001788FFFE0000FF")));
        h.discovery.notify_address_change("10.0.0.9");
        settle().await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.endpoint.address, "10.0.0.2");
        assert_eq!(h.fake.fetch_count(EntityType::Light), 1);

        h.fake.set_probe(None);
        h.discovery.notify_address_change("10.0.0.10");
        settle().await;
        assert_eq!(h.handle.status().await.unwrap().endpoint.address, "10.0.0.2");
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_stops_push_and_polling() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;
        assert!(h.fake.is_subscribed());

        h.handle
            .reconfigure(ScheduleSettings {
                poll_interval: None,
                push_enabled: false,
            })
            .await
            .unwrap();
        settle().await;

        assert!(!h.fake.is_subscribed());
        let status = h.handle.status().await.unwrap();
        assert!(!status.push_connected);
        assert_eq!(status.poll_interval_secs, None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.fake.fetch_count(EntityType::Light), 1);
        assert_eq!(h.fake.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_polls_ahead_of_schedule() {
        let h = start(&server(json!({"push_enabled": false})), &populated_fake());
        settle().await;
        assert_eq!(h.fake.fetch_count(EntityType::Scene), 1);

        h.handle.refresh().await.unwrap();
        settle().await;
        assert_eq!(h.fake.fetch_count(EntityType::Scene), 2);

        // the refresh counts as the periodic poll
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(h.fake.fetch_count(EntityType::Scene), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.fake.fetch_count(EntityType::Scene), 3);
    }

    /// Rejects the first update for light 1, counts delivered light updates.
    #[derive(Clone, Default)]
    struct FlakySink {
        rejected: Arc<Mutex<bool>>,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl FlakySink {
        fn delivered(&self, id: &str) -> usize {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .filter(|seen| *seen == id)
                .count()
        }
    }

    impl DeviceSink for FlakySink {
        fn entity_updated(&mut self, update: &EntityUpdate) -> Result<(), SinkError> {
            if update.entity_type != EntityType::Light {
                return Ok(());
            }
            let mut rejected = self.rejected.lock().unwrap();
            if update.id == "1" && !*rejected {
                *rejected = true;
                return Err(SinkError::Rejected(
                    update.entity_type,
                    update.id.clone(),
                    "busy".into(),
                ));
            }
            self.delivered.lock().unwrap().push(update.id.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_update_is_sent_again() {
        let server = server(json!({"push_enabled": false}));
        let endpoint = BridgeEndpoint::from_config("test", &server, "key");
        let sink = FlakySink::default();

        let (session, handle) = BridgeEndpointSession::new(
            "test",
            &server,
            populated_fake(),
            sink.clone(),
            Arc::new(StaticDiscovery::new(endpoint)),
        )
        .unwrap();
        let task = tokio::spawn(session.run());
        settle().await;

        assert_eq!(sink.delivered("1"), 0);
        assert_eq!(sink.delivered("2"), 1);

        // the next poll brings no changes, but light 1 was never accepted
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.delivered("1"), 1);
        assert_eq!(sink.delivered("2"), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.delivered("1"), 1);

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_task() {
        let h = start(&server(json!({})), &populated_fake());
        settle().await;

        h.handle.shutdown();
        h.task.await.unwrap().unwrap();
        assert!(h.handle.status().await.is_err());
    }
}
