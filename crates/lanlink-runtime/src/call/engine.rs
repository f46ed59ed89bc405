//! Media and signaling seams
//!
//! Codec selection, capture and ICE connectivity checks live behind these traits.
//! The call manager only moves descriptions and candidates between them and the
//! transport, and reacts to the connectivity the context reports.

use async_trait::async_trait;
use lanlink_core::{
    ConnectivityState, DeviceError, IceCandidate, PeerId, Result, SessionDescription, Signal,
};
use tokio::sync::mpsc;

/// Events a negotiation context reports back to the call manager
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// A local candidate to relay to the remote peer
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    /// Remote audio started arriving
    RemoteTrack,
}

/// A captured local audio track
pub trait LocalMedia: Send + Sync {
    fn set_enabled(&mut self, enabled: bool);
    fn stop(&mut self);
}

/// One peer-to-peer negotiation, equivalent to a single peer connection
#[async_trait]
pub trait NegotiationContext: Send + Sync {
    async fn attach_media(&mut self, media: &dyn LocalMedia) -> Result<()>;

    /// Create an offer and install it as the local description
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    /// Create an answer and install it as the local description
    async fn create_answer(&mut self) -> Result<SessionDescription>;

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    fn has_remote_description(&self) -> bool;

    async fn close(&mut self);
}

/// Factory for local audio and negotiation contexts
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn acquire_audio(&self) -> std::result::Result<Box<dyn LocalMedia>, DeviceError>;

    /// New context that reports its events on `events`
    async fn create_context(
        &self,
        events: mpsc::UnboundedSender<ContextEvent>,
    ) -> Result<Box<dyn NegotiationContext>>;
}

/// Carries call signals to remote peers
#[async_trait]
pub trait SignalingRelay: Send + Sync + 'static {
    async fn send_signal(&self, peer_id: &PeerId, signal: Signal) -> Result<()>;

    /// Display name for incoming-call notifications
    async fn peer_name(&self, _peer_id: &PeerId) -> Option<String> {
        None
    }
}
