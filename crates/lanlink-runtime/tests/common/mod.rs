//! Shared fixtures: loopback nodes and an in-memory media engine

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lanlink_core::call::SdpType;
use lanlink_core::{DeviceError, IceCandidate, SessionDescription};
use lanlink_runtime::{
    AppEvent, ContextEvent, LanConfig, LanNode, LocalMedia, MediaEngine, NegotiationContext,
    PeerId, Result, Signal, SignalingRelay,
};
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Nodes
// ----------------------------------------------------------------------------

pub fn node_config(name: &str, download_dir: &Path) -> LanConfig {
    LanConfig::testing()
        .with_device_name(name)
        .with_download_dir(download_dir)
}

pub async fn started_node(
    name: &str,
    download_dir: &Path,
) -> (LanNode, mpsc::UnboundedReceiver<AppEvent>) {
    let mut node = LanNode::new(node_config(name, download_dir)).unwrap();
    let events = node.take_event_receiver().unwrap();
    node.start().await.unwrap();
    (node, events)
}

/// Wait for the first event `select` accepts, skipping the rest
pub async fn wait_for_event<T, F>(events: &mut mpsc::UnboundedReceiver<AppEvent>, mut select: F) -> T
where
    F: FnMut(AppEvent) -> Option<T>,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if let Some(value) = select(event) {
                return value;
            }
        }
        panic!("event channel closed");
    })
    .await
    .expect("timed out waiting for event")
}

// ----------------------------------------------------------------------------
// Media Engine
// ----------------------------------------------------------------------------

pub struct MockMedia {
    enabled: Arc<AtomicBool>,
}

impl LocalMedia for MockMedia {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

/// Test-side view of one negotiation context
#[derive(Clone)]
pub struct ContextHandle {
    pub events: mpsc::UnboundedSender<ContextEvent>,
    pub applied: Arc<Mutex<Vec<IceCandidate>>>,
    pub closed: Arc<AtomicBool>,
}

impl ContextHandle {
    pub fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn report(&self, event: ContextEvent) {
        self.events.send(event).unwrap();
    }
}

struct MockContext {
    remote: bool,
    applied: Arc<Mutex<Vec<IceCandidate>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl NegotiationContext for MockContext {
    async fn attach_media(&mut self, _media: &dyn LocalMedia) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::new(SdpType::Offer, "v=0 local offer"))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        Ok(SessionDescription::new(SdpType::Answer, "v=0 local answer"))
    }

    async fn set_remote_description(&mut self, _description: SessionDescription) -> Result<()> {
        self.remote = true;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    fn has_remote_description(&self) -> bool {
        self.remote
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockEngine {
    pub deny_audio: bool,
    contexts: Mutex<Vec<ContextHandle>>,
}

impl MockEngine {
    pub fn denying() -> Self {
        Self {
            deny_audio: true,
            ..Self::default()
        }
    }

    pub fn context(&self, index: usize) -> ContextHandle {
        self.contexts.lock().unwrap()[index].clone()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn acquire_audio(&self) -> std::result::Result<Box<dyn LocalMedia>, DeviceError> {
        if self.deny_audio {
            return Err(DeviceError::PermissionDenied);
        }
        Ok(Box::new(MockMedia {
            enabled: Arc::new(AtomicBool::new(true)),
        }))
    }

    async fn create_context(
        &self,
        events: mpsc::UnboundedSender<ContextEvent>,
    ) -> Result<Box<dyn NegotiationContext>> {
        let handle = ContextHandle {
            events,
            applied: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let context = MockContext {
            remote: false,
            applied: handle.applied.clone(),
            closed: handle.closed.clone(),
        };
        self.contexts.lock().unwrap().push(handle);
        Ok(Box::new(context))
    }
}

// ----------------------------------------------------------------------------
// Signaling Relay
// ----------------------------------------------------------------------------

/// Records every relayed signal instead of sending it
#[derive(Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<(PeerId, Signal)>>,
}

impl RecordingRelay {
    pub fn sent(&self) -> Vec<(PeerId, Signal)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(PeerId, Signal)> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn ends_sent(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, signal)| matches!(signal, Signal::End { .. }))
            .count()
    }
}

#[async_trait]
impl SignalingRelay for RecordingRelay {
    async fn send_signal(&self, peer_id: &PeerId, signal: Signal) -> Result<()> {
        self.sent.lock().unwrap().push((peer_id.clone(), signal));
        Ok(())
    }

    async fn peer_name(&self, peer_id: &PeerId) -> Option<String> {
        peer_id
            .as_str()
            .split("::")
            .next()
            .map(str::to_string)
    }
}
