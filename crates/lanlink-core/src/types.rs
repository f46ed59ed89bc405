//! Core types for the LanLink protocol

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Directory-assigned peer identifier
///
/// Discovered peers use `device::port`; manual and contact-derived peers use
/// `manual::host:port` with the normalized host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Identifier of a peer found through discovery
    pub fn discovered(name: &str, port: u16) -> Self {
        Self(format!("{}::{}", name, port))
    }

    /// Identifier of a manually configured or contact-derived peer
    pub fn manual(normalized_host: &str, port: u16) -> Self {
        Self(format!("manual::{}:{}", normalized_host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_manual(&self) -> bool {
        self.0.starts_with("manual::")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Peer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerOrigin {
    Discovered,
    Manual,
}

/// A known peer in the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub last_seen: DateTime<Utc>,
    pub origin: PeerOrigin,
}

impl Peer {
    /// `host:port` suitable for a WebSocket URL, bracketing IPv6 literals
    pub fn socket_target(&self) -> String {
        socket_target(&self.host, self.port)
    }
}

/// Format a host and port, bracketing IPv6 literals
pub fn socket_target(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

// ----------------------------------------------------------------------------
// Sender Metadata
// ----------------------------------------------------------------------------

/// Sender identity carried in message payloads (`from`)
///
/// `port` is the sender's listening port, which is where acknowledgements go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderMeta {
    pub name: String,
    pub port: u16,
}

impl SenderMeta {
    pub fn new<S: Into<String>>(name: S, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_formats() {
        assert_eq!(PeerId::discovered("desk-1", 4100).as_str(), "desk-1::4100");
        let manual = PeerId::manual("192.168.1.5", 4100);
        assert_eq!(manual.as_str(), "manual::192.168.1.5:4100");
        assert!(manual.is_manual());
    }

    #[test]
    fn test_socket_target_brackets_ipv6() {
        assert_eq!(socket_target("10.0.0.1", 80), "10.0.0.1:80");
        assert_eq!(socket_target("fe80::1", 80), "[fe80::1]:80");
        assert_eq!(socket_target("[fe80::1]", 80), "[fe80::1]:80");
    }
}
