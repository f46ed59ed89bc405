//! Events surfaced by a LanLink node to the application layer

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chat::ChatEntry;
use crate::protocol::message::Signal;
use crate::types::{Peer, PeerId};

/// Events emitted by the node for the UI collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AppEvent {
    /// The merged directory listing changed
    PeersUpdated { peers: Vec<Peer> },
    /// A chat message arrived and was recorded
    ChatMessageReceived { peer_id: PeerId, message: ChatEntry },
    /// A peer confirmed one of our chat messages
    ChatAck { peer_id: PeerId, message_id: String },
    /// An inbound file completed and was verified
    FileReceived {
        peer_id: PeerId,
        name: String,
        size: u64,
        file_path: PathBuf,
    },
    /// A peer confirmed one of our file transfers
    FileAck { peer_id: PeerId, file_id: String },
    /// An inbound transfer was abandoned and its partial file removed
    FileTransferFailed {
        peer_id: PeerId,
        file_id: String,
        name: String,
        reason: String,
    },
    /// A call signaling message from a known peer
    Signaling { peer_id: PeerId, signal: Signal },
    /// A remote peer asked for our summary; answer with `resolve_local_summary`
    LocalSummaryRequested { request_id: String },
}

impl AppEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::PeersUpdated { .. } => "peers_updated",
            AppEvent::ChatMessageReceived { .. } => "chat_message",
            AppEvent::ChatAck { .. } => "chat_ack",
            AppEvent::FileReceived { .. } => "file_received",
            AppEvent::FileAck { .. } => "file_ack",
            AppEvent::FileTransferFailed { .. } => "file_failed",
            AppEvent::Signaling { .. } => "signaling",
            AppEvent::LocalSummaryRequested { .. } => "local_summary_requested",
        }
    }
}
