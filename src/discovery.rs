use tokio::sync::watch;

use crate::endpoint::BridgeEndpoint;

/// Source of the bridge endpoint a session talks to.
///
/// Finding bridges and pairing with them happens elsewhere. A session only
/// needs the current endpoint, and to hear when its address may have moved.
pub trait EndpointProvider: Send + Sync {
    fn current_endpoint(&self) -> Option<BridgeEndpoint>;

    /// Receives a new address whenever the bridge is suspected to have moved.
    fn address_changes(&self) -> watch::Receiver<String>;
}

/// Endpoint fixed by configuration. Address changes can still be announced
/// by hand, e.g. from an external discovery probe.
pub struct StaticDiscovery {
    endpoint: BridgeEndpoint,
    address: watch::Sender<String>,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new(endpoint: BridgeEndpoint) -> Self {
        let (address, _) = watch::channel(endpoint.address.clone());
        Self { endpoint, address }
    }

    pub fn notify_address_change(&self, address: impl Into<String>) {
        let address = address.into();
        log::debug!("[{}] Address change announced: {address}", self.endpoint.name);
        self.address.send_replace(address);
    }
}

impl EndpointProvider for StaticDiscovery {
    fn current_endpoint(&self) -> Option<BridgeEndpoint> {
        Some(BridgeEndpoint {
            address: self.address.borrow().clone(),
            ..self.endpoint.clone()
        })
    }

    fn address_changes(&self) -> watch::Receiver<String> {
        self.address.subscribe()
    }
}
