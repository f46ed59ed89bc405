//! LanLink Core Protocol Implementation
//!
//! This crate provides the foundational types, wire envelope, and pure domain logic
//! for the LanLink local-network peer protocol. It does not open sockets; the
//! `lanlink-runtime` crate drives everything defined here over Tokio.
//!
//! - [`protocol`] - Wire messages, handshake policy and signaling payloads
//! - [`directory`] - Known peers (discovered + manual) and identity reconciliation
//! - [`chat`] - Chat log with delivery status tracking
//! - [`file_transfer`] - Chunking math, MIME guessing and destination resolution
//! - [`call`] - Call session state machine and SDP/ICE payload normalization

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod call;
pub mod chat;
pub mod config;
pub mod directory;
pub mod errors;
pub mod file_transfer;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use call::{CallEvent, CallState, ConnectivityState, IceCandidate, SessionDescription};
pub use chat::{ChatDirection, ChatEntry, ChatKind, ChatLog, DeliveryStatus};
pub use config::{CallConfig, DiscoveryConfig, HandshakeConfig, LanConfig};
pub use directory::{normalize_address, ContactUpsert, PeerDirectory};
pub use errors::{DeviceError, LanError, Result, StateTransitionError, TransportError};
pub use protocol::{
    AppEvent, ChatMessagePayload, FileMeta, HandshakePolicy, HelloPayload, LanMessage, Signal,
    TodaySummary,
};
pub use types::{Peer, PeerId, PeerOrigin, SenderMeta};
