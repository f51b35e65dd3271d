use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use huesync_api::BridgeServer;

use crate::error::ApiResult;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
}

impl Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Connection details and health for one bridge.
#[derive(Clone, Debug, Serialize)]
pub struct BridgeEndpoint {
    pub name: String,
    pub address: String,
    #[serde(skip)]
    pub token: String,
    pub use_tls: bool,
    pub bridge_id: Option<String>,
    pub status: Connectivity,
    pub last_contact: Option<DateTime<Utc>>,
    pub failures: u32,
}

impl BridgeEndpoint {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            token: token.into(),
            use_tls: true,
            bridge_id: None,
            status: Connectivity::Offline,
            last_contact: None,
            failures: 0,
        }
    }

    #[must_use]
    pub fn from_config(name: &str, server: &BridgeServer, token: impl Into<String>) -> Self {
        Self {
            use_tls: server.use_tls,
            bridge_id: server.bridge_id.clone(),
            ..Self::new(name, server.address.clone(), token)
        }
    }

    pub fn base_url(&self) -> ApiResult<Url> {
        let scheme = if self.use_tls { "https" } else { "http" };
        Ok(Url::parse(&format!("{scheme}://{}/", self.address))?)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == Connectivity::Online
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        if !self.is_online() {
            log::info!("[{}] Bridge at {} is online", self.name, self.address);
        }
        self.status = Connectivity::Online;
        self.last_contact = Some(now);
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.is_online() {
            log::warn!("[{}] Bridge at {} is offline", self.name, self.address);
        }
        self.status = Connectivity::Offline;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::endpoint::{BridgeEndpoint, Connectivity};

    #[test]
    fn base_url_follows_tls_setting() {
        let mut ep = BridgeEndpoint::new("home", "10.0.0.2", "secret");
        assert_eq!(ep.base_url().unwrap().as_str(), "https://10.0.0.2/");

        ep.use_tls = false;
        ep.address = "bridge.local:8080".into();
        assert_eq!(ep.base_url().unwrap().as_str(), "http://bridge.local:8080/");
    }

    #[test]
    fn health_tracking() {
        let mut ep = BridgeEndpoint::new("home", "10.0.0.2", "secret");
        assert_eq!(ep.status, Connectivity::Offline);

        ep.record_failure();
        ep.record_failure();
        assert_eq!(ep.failures, 2);

        let now = Utc::now();
        ep.record_success(now);
        assert!(ep.is_online());
        assert_eq!(ep.failures, 0);
        assert_eq!(ep.last_contact, Some(now));

        ep.record_failure();
        assert!(!ep.is_online());
        assert_eq!(ep.last_contact, Some(now));
    }

    #[test]
    fn token_is_not_serialized() {
        let ep = BridgeEndpoint::new("home", "10.0.0.2", "secret");
        let json = serde_json::to_string(&ep).unwrap();
        assert!(!json.contains("secret"));
    }
}
