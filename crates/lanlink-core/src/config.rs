//! Centralized Configuration Management
//!
//! All tunables of a LanLink node live here: identity, transport timeouts, the
//! download directory, handshake strictness, discovery and call timers. Every
//! structure is serde-enabled so the CLI can layer it from TOML and environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// Application identifier exchanged in the handshake
pub const DEFAULT_APP_NAME: &str = "WorkQuest";
/// Protocol version exchanged in the handshake
pub const DEFAULT_PROTOCOL_VERSION: &str = "1";
/// Service type advertised on the multicast group
pub const DEFAULT_SERVICE_TYPE: &str = "workquest";

// ----------------------------------------------------------------------------
// Handshake Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Reject peers that advertise a different protocol version
    pub strict_version: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            strict_version: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Discovery Configuration
// ----------------------------------------------------------------------------

/// Configuration for UDP multicast service discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether to advertise and browse at all
    pub enabled: bool,
    /// IPv4 multicast group
    pub multicast_addr: String,
    /// Multicast port shared by every node
    pub multicast_port: u16,
    /// How often this node re-announces itself
    pub announce_interval_ms: u64,
    /// Discovered entries not re-announced within this window expire
    pub peer_ttl_ms: u64,
    /// Service type carried in every record
    pub service_type: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_addr: "239.255.77.77".to_string(),
            multicast_port: 47777,
            announce_interval_ms: 5_000,
            peer_ttl_ms: 30_000,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Discovery switched off, used by tests and manual-only setups
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }
}

// ----------------------------------------------------------------------------
// Call Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Time a disconnected call may take to recover before it is torn down
    pub disconnect_grace_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_ms: 8_000,
        }
    }
}

impl CallConfig {
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration for a LanLink node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanConfig {
    /// Application identifier; peers with a different one are rejected
    pub app_name: String,
    /// Human readable device name advertised to peers
    pub device_name: String,
    /// Protocol version advertised in the handshake
    pub protocol_version: String,
    /// Address the WebSocket server binds to (port is always ephemeral)
    pub bind_address: String,
    /// Connect timeout for ping, summary, chat, acks and signaling
    pub connect_timeout_ms: u64,
    /// Connect and per-frame timeout for file transfers
    pub file_timeout_ms: u64,
    /// Raw bytes per FILE_CHUNK before base64 encoding
    pub chunk_size: usize,
    /// How long the UI has to answer a local summary request
    pub local_summary_timeout_ms: u64,
    /// Where received files are written
    pub download_dir: PathBuf,
    pub handshake: HandshakeConfig,
    pub discovery: DiscoveryConfig,
    pub call: CallConfig,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            device_name: default_device_name(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5_000,
            file_timeout_ms: 10_000,
            chunk_size: 64 * 1024,
            local_summary_timeout_ms: 3_000,
            download_dir: default_download_dir(),
            handshake: HandshakeConfig::default(),
            discovery: DiscoveryConfig::default(),
            call: CallConfig::default(),
        }
    }
}

impl LanConfig {
    /// Create configuration suitable for loopback tests: no discovery, short timeouts
    pub fn testing() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            connect_timeout_ms: 2_000,
            file_timeout_ms: 5_000,
            local_summary_timeout_ms: 1_000,
            discovery: DiscoveryConfig::disabled(),
            ..Self::default()
        }
    }

    /// Builder method for setting the advertised device name
    pub fn with_device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.device_name = name.into();
        self
    }

    /// Builder method for setting the download directory
    pub fn with_download_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Builder method for setting the server bind address
    pub fn with_bind_address<S: Into<String>>(mut self, addr: S) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Builder method for customizing handshake policy
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Builder method for customizing discovery configuration
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    /// Builder method for customizing call configuration
    pub fn with_call(mut self, call: CallConfig) -> Self {
        self.call = call;
        self
    }

    /// Builder method for overriding the local summary deadline
    pub fn with_local_summary_timeout(mut self, timeout: Duration) -> Self {
        self.local_summary_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_millis(self.file_timeout_ms)
    }

    pub fn local_summary_timeout(&self) -> Duration {
        Duration::from_millis(self.local_summary_timeout_ms)
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.app_name.trim().is_empty() {
            return Err("App name cannot be empty".into());
        }
        if self.device_name.trim().is_empty() {
            return Err("Device name cannot be empty".into());
        }
        if self.protocol_version.trim().is_empty() {
            return Err("Protocol version cannot be empty".into());
        }
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.bind_address));
        }
        if self.connect_timeout_ms == 0 || self.file_timeout_ms == 0 {
            return Err("Transport timeouts must be greater than zero".into());
        }
        if self.local_summary_timeout_ms == 0 {
            return Err("Local summary timeout must be greater than zero".into());
        }
        if self.chunk_size == 0 {
            return Err("Chunk size cannot be zero".into());
        }

        if self.discovery.enabled {
            let group: std::net::Ipv4Addr = self
                .discovery
                .multicast_addr
                .parse()
                .map_err(|_| format!("Invalid multicast address: {}", self.discovery.multicast_addr))?;
            if !group.is_multicast() {
                return Err(format!("{} is not a multicast address", group));
            }
            if self.discovery.multicast_port == 0 {
                return Err("Multicast port cannot be zero".into());
            }
            if self.discovery.announce_interval_ms == 0 {
                return Err("Announce interval must be greater than zero".into());
            }
            if self.discovery.peer_ttl_ms <= self.discovery.announce_interval_ms {
                return Err("Peer TTL must exceed the announce interval".into());
            }
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "lanlink-device".to_string())
}

fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(|| std::env::temp_dir().join("lanlink-downloads"))
}
