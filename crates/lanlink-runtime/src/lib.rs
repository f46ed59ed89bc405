//! LanLink Runtime Engine
//!
//! This crate drives the `lanlink-core` protocol over Tokio:
//! - `LanServer` / `LanClient`: WebSocket transport with the HELLO handshake
//! - `Discovery`: UDP multicast advertising and browsing
//! - `LanNode`: the orchestrator owning directory, chat log, transfers and pending requests
//! - `CallManager`: one-call-at-a-time session driver over pluggable media traits
//!
//! `lanlink-core` holds the stable types; this crate is where sockets and tasks live.

pub mod call;
pub mod client;
pub mod discovery;
pub mod node;
pub mod pending;
pub mod server;
pub mod transfers;

pub use call::{
    CallManager, ContextEvent, LocalMedia, MediaEngine, NegotiationContext, SignalingRelay,
};
pub use client::LanClient;
pub use discovery::{Discovery, RecordKind, ServiceRecord};
pub use node::LanNode;
pub use pending::PendingRequests;
pub use server::{InboundHandler, LanServer, RemoteEndpoint};
pub use transfers::{
    ChunkOutcome, CompleteOutcome, CompletedTransfer, IncomingTransfers, TransferFailure,
    TransferSender,
};

// Re-export core types for convenience
pub use lanlink_core::{
    AppEvent, CallEvent, CallState, ChatEntry, LanConfig, LanError, LanMessage, Peer, PeerId,
    Result, Signal, TodaySummary,
};
