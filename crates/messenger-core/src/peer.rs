//! Directory records: what a peer registers and what lookups return.

use serde::{Deserialize, Serialize};

/// One peer as known to the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub username: String,
    /// `host:port` of the peer's text listener.
    pub tcp_addr: String,
    /// `host:port` of the peer's image listener.
    pub udp_addr: String,
}

impl std::fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} tcp={} udp={}", self.username, self.tcp_addr, self.udp_addr)
    }
}

/// Body of `GET /peer/{username}` and `GET /peer/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPeerResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerRecord>,
}

/// Body of `POST /peer/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostPeerResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
