//! Wire protocol for LanLink
//!
//! - [`message`] - The `LanMessage` envelope and its payloads
//! - [`handshake`] - HELLO / HELLO_OK payloads and acceptance policy
//! - [`events`] - Events the node surfaces to the application layer

pub mod events;
pub mod handshake;
pub mod message;

pub use events::AppEvent;
pub use handshake::{HandshakePolicy, HelloPayload};
pub use message::{
    CallEndPayload, CallSdpPayload, ChatAckPayload, ChatMessagePayload, FileAckPayload,
    FileChunkPayload, FileCompletePayload, FileMeta, FileOfferPayload, IceCandidatePayload,
    LanMessage, Signal, TodaySummary,
};
