//! Relay configuration: the STUN/TURN servers a peer connection uses for NAT traversal.

use serde::{Deserialize, Serialize};

/// Public STUN servers used when no relay credentials are available.
pub const DEFAULT_STUN_URLS: &[&str] = &[
    "stun:stun.relay.metered.ca:80",
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Relay (TURN) endpoints that the fetched credentials authenticate against.
pub const DEFAULT_TURN_URLS: &[&str] = &[
    "turn:standard.relay.metered.ca:80",
    "turn:standard.relay.metered.ca:80?transport=tcp",
    "turn:standard.relay.metered.ca:443",
    "turns:standard.relay.metered.ca:443?transport=tcp",
];

/// ICE server configuration (STUN/TURN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: impl Into<String>, credentials: &TurnCredentials) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(credentials.username.clone()),
            credential: Some(credentials.credential.clone()),
        }
    }

    /// Whether this entry is an authenticated relay rather than a reflection server.
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Response body of the credential endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCredentials {
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    #[default]
    MaxBundle,
    MaxCompat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RtcpMuxPolicy {
    #[default]
    Require,
    Negotiate,
}

/// Everything a negotiation engine needs to build a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_candidate_pool_size: u8,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
    pub rtcp_mux_policy: RtcpMuxPolicy,
}

impl RelayConfig {
    /// Build a configuration from an explicit STUN list.
    pub fn with_stun<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ice_servers: urls.into_iter().map(IceServer::stun).collect(),
            ice_candidate_pool_size: 10,
            ice_transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
            rtcp_mux_policy: RtcpMuxPolicy::Require,
        }
    }

    /// Append one authenticated relay entry per URL.
    pub fn with_turn<I, S>(mut self, urls: I, credentials: &TurnCredentials) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers
            .extend(urls.into_iter().map(|u| IceServer::turn(u, credentials)));
        self
    }

    pub fn has_relay(&self) -> bool {
        self.ice_servers.iter().any(IceServer::is_relay)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::with_stun(DEFAULT_STUN_URLS.iter().copied())
    }
}
