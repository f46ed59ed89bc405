//! Call events and connectivity states
//!
//! [`ConnectivityState`] is what the negotiation context reports about its transport.
//! [`CallEvent`] is what the call manager tells the UI.

use serde::{Deserialize, Serialize};

use crate::call::state::CallState;
use crate::types::PeerId;

/// Connectivity reported by the negotiation context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by the call manager for the UI collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CallEvent {
    IncomingCall { peer_id: PeerId, peer_name: String },
    StateChanged { peer_id: Option<PeerId>, state: CallState },
    RingingStarted { peer_id: PeerId },
    RingingStopped,
    /// Remote audio is available for playback
    RemoteMedia { peer_id: PeerId },
    CallEnded { peer_id: PeerId, reason: String },
}
