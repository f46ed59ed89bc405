//! Call sessions
//!
//! - [`engine`] - Traits at the seam with the audio negotiation engine and the transport
//! - [`manager`] - `CallManager`, which drives one session at a time

pub mod engine;
pub mod manager;

pub use engine::{ContextEvent, LocalMedia, MediaEngine, NegotiationContext, SignalingRelay};
pub use manager::CallManager;
