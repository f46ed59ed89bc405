//! Connection handshake
//!
//! The initiator opens with `HELLO`, the responder answers `HELLO_OK` with its own
//! identity. Both sides run the remote payload through [`HandshakePolicy::check`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LanConfig;

/// Identity exchanged in HELLO / HELLO_OK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub app: String,
    pub device: String,
    pub v: String,
}

impl HelloPayload {
    pub fn from_config(config: &LanConfig) -> Self {
        Self {
            app: config.app_name.clone(),
            device: config.device_name.clone(),
            v: config.protocol_version.clone(),
        }
    }
}

/// Decides whether a remote HELLO / HELLO_OK is acceptable
#[derive(Debug, Clone)]
pub struct HandshakePolicy {
    local: HelloPayload,
    strict_version: bool,
}

impl HandshakePolicy {
    pub fn new(local: HelloPayload, strict_version: bool) -> Self {
        Self {
            local,
            strict_version,
        }
    }

    pub fn from_config(config: &LanConfig) -> Self {
        Self::new(
            HelloPayload::from_config(config),
            config.handshake.strict_version,
        )
    }

    /// Our own identity, sent in HELLO and HELLO_OK
    pub fn local(&self) -> &HelloPayload {
        &self.local
    }

    /// Returns the rejection reason when the remote identity is not acceptable
    pub fn check(&self, remote: &HelloPayload) -> Result<(), String> {
        if remote.app != self.local.app {
            return Err(format!(
                "app mismatch: expected {}, got {}",
                self.local.app, remote.app
            ));
        }
        if remote.v != self.local.v {
            if self.strict_version {
                return Err(format!(
                    "protocol version mismatch: expected {}, got {}",
                    self.local.v, remote.v
                ));
            }
            warn!(
                "Accepting {} with protocol version {} (local {})",
                remote.device, remote.v, self.local.v
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(app: &str, v: &str) -> HelloPayload {
        HelloPayload {
            app: app.to_string(),
            device: "remote".to_string(),
            v: v.to_string(),
        }
    }

    #[test]
    fn test_app_mismatch_always_rejected() {
        let lenient = HandshakePolicy::new(hello("WorkQuest", "1"), false);
        assert!(lenient.check(&hello("Other", "1")).is_err());
        assert!(lenient.check(&hello("WorkQuest", "1")).is_ok());
    }

    #[test]
    fn test_version_mismatch_depends_on_strictness() {
        let strict = HandshakePolicy::new(hello("WorkQuest", "1"), true);
        assert!(strict.check(&hello("WorkQuest", "2")).is_err());

        let lenient = HandshakePolicy::new(hello("WorkQuest", "1"), false);
        assert!(lenient.check(&hello("WorkQuest", "2")).is_ok());
    }
}
