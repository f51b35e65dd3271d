//! Scripted transport for driving sessions in tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use hue::legacy_api::ApiShortConfig;
use huesync_api::{EntityCommand, EntityType};

use crate::cache::EntityMap;
use crate::endpoint::BridgeEndpoint;
use crate::transport::{PushEvent, PushStream, Transport, TransportError, TransportResult};

#[derive(Default)]
struct FakeState {
    snapshots: BTreeMap<EntityType, EntityMap>,
    fetches: BTreeMap<EntityType, u32>,
    fail_fetches: u32,
    fail_commands: u32,
    fail_subscribe: bool,
    commands: Vec<EntityCommand>,
    subscriptions: u32,
    push: Option<mpsc::UnboundedSender<TransportResult<PushEvent>>>,
    probe: Option<ApiShortConfig>,
    probed: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_snapshot(&self, etype: EntityType, records: EntityMap) {
        self.lock().snapshots.insert(etype, records);
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().fail_fetches = count;
    }

    pub fn fail_next_commands(&self, count: u32) {
        self.lock().fail_commands = count;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    pub fn set_probe(&self, config: Option<ApiShortConfig>) {
        self.lock().probe = config;
    }

    /// Number of fetch attempts for a type, failed ones included.
    pub fn fetch_count(&self, etype: EntityType) -> u32 {
        self.lock().fetches.get(&etype).copied().unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<EntityCommand> {
        self.lock().commands.clone()
    }

    pub fn subscriptions(&self) -> u32 {
        self.lock().subscriptions
    }

    pub fn probed(&self) -> Vec<String> {
        self.lock().probed.clone()
    }

    /// Whether a subscriber is still holding the current stream.
    pub fn is_subscribed(&self) -> bool {
        self.lock().push.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn push(&self, event: PushEvent) -> bool {
        self.lock()
            .push
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(event)).is_ok())
    }

    pub fn push_error(&self) -> bool {
        self.lock()
            .push
            .as_ref()
            .is_some_and(|tx| tx.send(Err(TransportError::StreamClosed)).is_ok())
    }

    /// End the current stream, as a bridge dropping the connection would.
    pub fn close_push(&self) {
        self.lock().push = None;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_snapshot(
        &self,
        _endpoint: &BridgeEndpoint,
        etype: EntityType,
    ) -> TransportResult<EntityMap> {
        let mut state = self.lock();
        *state.fetches.entry(etype).or_default() += 1;
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(TransportError::Scripted(format!("fetch {etype}")));
        }
        Ok(state.snapshots.get(&etype).cloned().unwrap_or_default())
    }

    async fn subscribe(&self, _endpoint: &BridgeEndpoint) -> TransportResult<PushStream> {
        let mut state = self.lock();
        state.subscriptions += 1;
        if state.fail_subscribe {
            return Err(TransportError::Scripted("subscribe".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.push = Some(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn send_command(
        &self,
        _endpoint: &BridgeEndpoint,
        cmd: &EntityCommand,
    ) -> TransportResult<()> {
        let mut state = self.lock();
        state.commands.push(cmd.clone());
        if state.fail_commands > 0 {
            state.fail_commands -= 1;
            return Err(TransportError::Scripted("command".into()));
        }
        Ok(())
    }

    async fn probe(&self, endpoint: &BridgeEndpoint) -> TransportResult<ApiShortConfig> {
        let mut state = self.lock();
        state.probed.push(endpoint.address.clone());
        state
            .probe
            .clone()
            .ok_or_else(|| TransportError::NotABridge(endpoint.address.clone()))
    }
}
