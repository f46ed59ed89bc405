//! Call session primitives
//!
//! - [`state`] - One-call-at-a-time session state machine
//! - [`sdp`] - Normalization of SDP and ICE payloads received from peers
//! - [`events`] - Events surfaced by the call manager and negotiation connectivity

pub mod events;
pub mod sdp;
pub mod state;

pub use events::{CallEvent, ConnectivityState};
pub use sdp::{IceCandidate, SdpType, SessionDescription};
pub use state::{CallState, CallTrigger};
