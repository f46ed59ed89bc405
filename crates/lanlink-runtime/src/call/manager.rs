//! Call Manager
//!
//! Drives at most one call session at a time. Local actions (initiate, answer,
//! hang up, mute) and remote signals (offer, answer, candidate, end) move the
//! session through [`CallState`]; connectivity reported by the negotiation context
//! promotes, suspends or tears it down.
//!
//! Every session gets a numeric id. Timers and context events carry that id, so
//! anything left over from an earlier session is ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lanlink_core::{
    CallConfig, CallEvent, CallState, ConnectivityState, IceCandidate, LanError, PeerId, Result,
    SessionDescription, Signal, StateTransitionError,
};
use lanlink_core::call::{CallTrigger, SdpType};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::engine::{
    ContextEvent, LocalMedia, MediaEngine, NegotiationContext, SignalingRelay,
};

const BUSY_REASON: &str = "busy";

/// Candidates held per peer while no remote description exists
const MAX_QUEUED_CANDIDATES: usize = 64;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

struct CallSession {
    id: u64,
    peer_id: PeerId,
    call_id: String,
    state: CallState,
    context: Box<dyn NegotiationContext>,
    media: Option<Box<dyn LocalMedia>>,
    muted: bool,
    ringing: bool,
    connectivity: ConnectivityState,
    grace: Option<JoinHandle<()>>,
}

struct QueuedCandidate {
    call_id: String,
    candidate: IceCandidate,
}

#[derive(Default)]
struct ManagerState {
    session: Option<CallSession>,
    /// Candidates that arrived before a remote description, per peer
    pending: HashMap<PeerId, Vec<QueuedCandidate>>,
}

struct Inner {
    engine: Arc<dyn MediaEngine>,
    relay: Arc<dyn SignalingRelay>,
    config: CallConfig,
    state: Mutex<ManagerState>,
    events: mpsc::UnboundedSender<CallEvent>,
    next_session: AtomicU64,
}

// ----------------------------------------------------------------------------
// Public Handle
// ----------------------------------------------------------------------------

pub struct CallManager {
    inner: Arc<Inner>,
    event_receiver: Option<mpsc::UnboundedReceiver<CallEvent>>,
}

impl CallManager {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        relay: Arc<dyn SignalingRelay>,
        config: CallConfig,
    ) -> Self {
        let (events, event_receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                engine,
                relay,
                config,
                state: Mutex::new(ManagerState::default()),
                events,
                next_session: AtomicU64::new(1),
            }),
            event_receiver: Some(event_receiver),
        }
    }

    /// Take the call event receiver for the UI
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.event_receiver.take()
    }

    /// Start a call; returns the new call id
    pub async fn initiate(&self, peer_id: &PeerId) -> Result<String> {
        self.inner.initiate(peer_id).await
    }

    /// Accept the ringing call
    pub async fn answer(&self) -> Result<()> {
        self.inner.answer().await
    }

    /// End the active call, telling the peer; returns whether there was one
    pub async fn hang_up(&self) -> bool {
        self.inner.end_session(None, "hangup", true).await
    }

    /// Flip the local track; returns the new muted flag
    pub async fn toggle_mute(&self) -> Result<bool> {
        let mut guard = self.inner.state.lock().await;
        let session = guard
            .session
            .as_mut()
            .ok_or_else(|| LanError::invalid_input("no active call"))?;
        session.muted = !session.muted;
        if let Some(media) = session.media.as_mut() {
            media.set_enabled(!session.muted);
        }
        debug!("Call with {} muted={}", session.peer_id, session.muted);
        Ok(session.muted)
    }

    /// Feed a signal received from `peer_id`
    pub async fn handle_signal(&self, peer_id: &PeerId, signal: Signal) {
        self.inner.handle_signal(peer_id, signal).await
    }

    pub async fn state(&self) -> CallState {
        self.inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(CallState::Idle)
    }

    pub async fn active_peer(&self) -> Option<PeerId> {
        self.inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.peer_id.clone())
    }

    pub async fn is_muted(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.muted)
            .unwrap_or(false)
    }

    /// Number of candidates queued for `peer_id`
    pub async fn queued_candidates(&self, peer_id: &PeerId) -> usize {
        self.inner
            .state
            .lock()
            .await
            .pending
            .get(peer_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Session Logic
// ----------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::SeqCst)
    }

    async fn initiate(self: &Arc<Self>, peer_id: &PeerId) -> Result<String> {
        let mut guard = self.state.lock().await;
        if let Some(active) = guard.session.as_ref() {
            return Err(LanError::Busy {
                peer_id: active.peer_id.to_string(),
            });
        }
        let next_state = CallState::Idle.transition(CallTrigger::Initiate)?;

        let mut media = self.engine.acquire_audio().await?;
        let (context_events, context_receiver) = mpsc::unbounded_channel();
        let mut context = match self.engine.create_context(context_events).await {
            Ok(context) => context,
            Err(e) => {
                media.stop();
                return Err(e);
            }
        };
        let offer = match describe_local(&mut *context, &*media, SdpType::Offer).await {
            Ok(offer) => offer,
            Err(e) => {
                context.close().await;
                media.stop();
                return Err(e);
            }
        };

        let session_id = self.next_session_id();
        let call_id = uuid::Uuid::new_v4().to_string();
        guard.session = Some(CallSession {
            id: session_id,
            peer_id: peer_id.clone(),
            call_id: call_id.clone(),
            state: next_state,
            context,
            media: Some(media),
            muted: false,
            ringing: false,
            connectivity: ConnectivityState::New,
            grace: None,
        });
        drop(guard);

        self.spawn_context_pump(session_id, context_receiver);
        self.emit(CallEvent::StateChanged {
            peer_id: Some(peer_id.clone()),
            state: next_state,
        });
        info!("Calling {} (call {})", peer_id, call_id);

        let signal = Signal::Offer {
            sdp: offer.to_value(),
            call_id: call_id.clone(),
        };
        if let Err(e) = self.relay.send_signal(peer_id, signal).await {
            warn!("Failed to deliver offer to {}: {}", peer_id, e);
            self.end_session(Some(session_id), "offer not delivered", false)
                .await;
            return Err(e);
        }
        Ok(call_id)
    }

    async fn answer(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.state.lock().await;
        let session = match guard.session.as_mut() {
            Some(session) if session.state == CallState::Ringing => session,
            other => {
                let from = other.map(|s| s.state).unwrap_or(CallState::Idle);
                return Err(StateTransitionError {
                    from: from.state_name().to_string(),
                    trigger: format!("{:?}", CallTrigger::Accept),
                }
                .into());
            }
        };
        let session_id = session.id;
        self.stop_ringing(session);

        let prepared = match self.engine.acquire_audio().await {
            Ok(mut media) => {
                match describe_local(&mut *session.context, &*media, SdpType::Answer).await {
                    Ok(answer) => Ok((media, answer)),
                    Err(e) => {
                        media.stop();
                        Err(e)
                    }
                }
            }
            Err(e) => Err(LanError::from(e)),
        };
        let (media, answer) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                drop(guard);
                warn!("Answering call failed: {}", e);
                self.end_session(Some(session_id), "answer failed", true)
                    .await;
                return Err(e);
            }
        };

        session.media = Some(media);
        session.state = session.state.transition(CallTrigger::Accept)?;
        let peer_id = session.peer_id.clone();
        let call_id = session.call_id.clone();
        drop(guard);

        self.emit(CallEvent::StateChanged {
            peer_id: Some(peer_id.clone()),
            state: CallState::Connected,
        });
        info!("Answered call {} from {}", call_id, peer_id);

        let signal = Signal::Answer {
            sdp: answer.to_value(),
            call_id,
        };
        if let Err(e) = self.relay.send_signal(&peer_id, signal).await {
            warn!("Failed to deliver answer to {}: {}", peer_id, e);
            self.end_session(Some(session_id), "answer not delivered", false)
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn handle_signal(self: &Arc<Self>, peer_id: &PeerId, signal: Signal) {
        match signal {
            Signal::Offer { sdp, call_id } => self.on_remote_offer(peer_id, &sdp, call_id).await,
            Signal::Answer { sdp, call_id } => {
                self.on_remote_answer(peer_id, &sdp, &call_id).await
            }
            Signal::IceCandidate { candidate, call_id } => {
                self.on_remote_candidate(peer_id, &candidate, call_id).await
            }
            Signal::End { call_id, reason } => {
                self.on_remote_end(peer_id, &call_id, reason.as_deref()).await
            }
        }
    }

    async fn on_remote_end(&self, peer_id: &PeerId, call_id: &str, reason: Option<&str>) {
        let active = {
            let mut guard = self.state.lock().await;
            let matched = guard
                .session
                .as_ref()
                .filter(|session| &session.peer_id == peer_id)
                .map(|session| (session.id, session.call_id == call_id));
            match matched {
                Some((session_id, true)) => Some(session_id),
                Some((_, false)) => {
                    debug!("Ignoring end of stale call {} from {}", call_id, peer_id);
                    None
                }
                None => {
                    discard_queued(&mut guard.pending, peer_id, call_id);
                    None
                }
            }
        };
        if let Some(session_id) = active {
            let reason = reason.unwrap_or("remote ended");
            self.end_session(Some(session_id), reason, false).await;
        }
    }

    async fn on_remote_offer(self: &Arc<Self>, peer_id: &PeerId, sdp: &serde_json::Value, call_id: String) {
        let description = match SessionDescription::normalize(sdp, SdpType::Offer) {
            Ok(description) => description,
            Err(e) => {
                warn!("Ignoring offer from {}: {}", peer_id, e);
                return;
            }
        };

        let mut guard = self.state.lock().await;
        if guard.session.is_some() {
            discard_queued(&mut guard.pending, peer_id, &call_id);
            drop(guard);
            info!("Rejecting call from {}: already in a call", peer_id);
            let busy = Signal::End {
                call_id,
                reason: Some(BUSY_REASON.to_string()),
            };
            if let Err(e) = self.relay.send_signal(peer_id, busy).await {
                debug!("Busy reply to {} failed: {}", peer_id, e);
            }
            return;
        }
        let next_state = match CallState::Idle.transition(CallTrigger::RemoteOffer) {
            Ok(state) => state,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        let (context_events, context_receiver) = mpsc::unbounded_channel();
        let mut context = match self.engine.create_context(context_events).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Cannot create context for call from {}: {}", peer_id, e);
                return;
            }
        };
        if let Err(e) = context.set_remote_description(description).await {
            warn!("Cannot apply offer from {}: {}", peer_id, e);
            context.close().await;
            return;
        }

        let ManagerState { session, pending } = &mut *guard;
        flush_candidates(&mut *context, peer_id, &call_id, pending).await;

        let session_id = self.next_session_id();
        *session = Some(CallSession {
            id: session_id,
            peer_id: peer_id.clone(),
            call_id,
            state: next_state,
            context,
            media: None,
            muted: false,
            ringing: true,
            connectivity: ConnectivityState::New,
            grace: None,
        });
        drop(guard);

        self.spawn_context_pump(session_id, context_receiver);
        let peer_name = self
            .relay
            .peer_name(peer_id)
            .await
            .unwrap_or_else(|| peer_id.to_string());
        info!("Incoming call from {}", peer_name);
        self.emit(CallEvent::IncomingCall {
            peer_id: peer_id.clone(),
            peer_name,
        });
        self.emit(CallEvent::StateChanged {
            peer_id: Some(peer_id.clone()),
            state: next_state,
        });
        self.emit(CallEvent::RingingStarted {
            peer_id: peer_id.clone(),
        });
    }

    async fn on_remote_answer(
        self: &Arc<Self>,
        peer_id: &PeerId,
        sdp: &serde_json::Value,
        call_id: &str,
    ) {
        let mut guard = self.state.lock().await;
        let ManagerState { session, pending } = &mut *guard;
        let Some(session) = session.as_mut().filter(|s| {
            &s.peer_id == peer_id && s.call_id == call_id && s.state == CallState::Calling
        }) else {
            debug!("Ignoring answer from {} without a matching call", peer_id);
            return;
        };
        let description = match SessionDescription::normalize(sdp, SdpType::Answer) {
            Ok(description) => description,
            Err(e) => {
                warn!("Ignoring answer from {}: {}", peer_id, e);
                return;
            }
        };

        let session_id = session.id;
        if let Err(e) = session.context.set_remote_description(description).await {
            drop(guard);
            warn!("Cannot apply answer from {}: {}", peer_id, e);
            self.end_session(Some(session_id), "answer rejected", true)
                .await;
            return;
        }
        match session.state.transition(CallTrigger::RemoteAnswer) {
            Ok(next_state) => session.state = next_state,
            Err(e) => warn!("{}", e),
        }
        let call_id = session.call_id.clone();
        flush_candidates(&mut *session.context, peer_id, &call_id, pending).await;
        let state = session.state;
        drop(guard);

        self.emit(CallEvent::StateChanged {
            peer_id: Some(peer_id.clone()),
            state,
        });
    }

    async fn on_remote_candidate(
        &self,
        peer_id: &PeerId,
        candidate: &serde_json::Value,
        call_id: String,
    ) {
        let candidate = match IceCandidate::normalize(candidate) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!("Dropping candidate from {}: {}", peer_id, e);
                return;
            }
        };

        let mut guard = self.state.lock().await;
        let ManagerState { session, pending } = &mut *guard;
        match session.as_mut() {
            Some(session) if &session.peer_id == peer_id => {
                if session.call_id != call_id {
                    debug!("Dropping candidate for stale call {} from {}", call_id, peer_id);
                } else if !session.context.has_remote_description() {
                    queue_candidate(pending, peer_id, call_id, candidate);
                } else if let Err(e) = session.context.add_ice_candidate(candidate.clone()).await {
                    debug!("Queueing candidate from {} after apply failed: {}", peer_id, e);
                    queue_candidate(pending, peer_id, call_id, candidate);
                }
            }
            Some(_) => debug!("Dropping candidate from {} while in another call", peer_id),
            None => queue_candidate(pending, peer_id, call_id, candidate),
        }
    }

    // ------------------------------------------------------------------------
    // Context Events
    // ------------------------------------------------------------------------

    fn spawn_context_pump(
        self: &Arc<Self>,
        session_id: u64,
        mut receiver: mpsc::UnboundedReceiver<ContextEvent>,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                if !inner.handle_context_event(session_id, event).await {
                    break;
                }
            }
        });
    }

    /// Returns `false` once the session is gone
    async fn handle_context_event(self: &Arc<Self>, session_id: u64, event: ContextEvent) -> bool {
        let mut guard = self.state.lock().await;
        let Some(session) = guard.session.as_mut().filter(|s| s.id == session_id) else {
            return false;
        };

        match event {
            ContextEvent::LocalCandidate(candidate) => {
                let candidate = match IceCandidate::normalize(&candidate.to_value()) {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        debug!("Dropping local candidate: {}", e);
                        return true;
                    }
                };
                let peer_id = session.peer_id.clone();
                let signal = Signal::IceCandidate {
                    candidate: candidate.to_value(),
                    call_id: session.call_id.clone(),
                };
                drop(guard);
                if let Err(e) = self.relay.send_signal(&peer_id, signal).await {
                    debug!("Failed to relay candidate to {}: {}", peer_id, e);
                }
            }
            ContextEvent::RemoteTrack => {
                let peer_id = session.peer_id.clone();
                drop(guard);
                self.emit(CallEvent::RemoteMedia { peer_id });
            }
            ContextEvent::Connectivity(connectivity) => {
                session.connectivity = connectivity;
                match connectivity {
                    ConnectivityState::Connected => {
                        if let Some(grace) = session.grace.take() {
                            grace.abort();
                            info!("Call with {} recovered", session.peer_id);
                        }
                        if session.state == CallState::Calling {
                            if let Ok(next_state) =
                                session.state.transition(CallTrigger::ConnectivityUp)
                            {
                                session.state = next_state;
                                let peer_id = session.peer_id.clone();
                                drop(guard);
                                self.emit(CallEvent::StateChanged {
                                    peer_id: Some(peer_id),
                                    state: next_state,
                                });
                            }
                        }
                    }
                    ConnectivityState::Disconnected => {
                        if session.grace.is_none() {
                            warn!(
                                "Call with {} disconnected, waiting {:?} to recover",
                                session.peer_id,
                                self.config.disconnect_grace()
                            );
                            session.grace = Some(self.spawn_grace_timer(session_id));
                        }
                    }
                    ConnectivityState::Failed | ConnectivityState::Closed => {
                        drop(guard);
                        let reason = if connectivity == ConnectivityState::Failed {
                            "connection failed"
                        } else {
                            "connection closed"
                        };
                        self.end_session(Some(session_id), reason, true).await;
                        return false;
                    }
                    ConnectivityState::New | ConnectivityState::Connecting => {}
                }
            }
        }
        true
    }

    fn spawn_grace_timer(self: &Arc<Self>, session_id: u64) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let grace = self.config.disconnect_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.grace_expired(session_id).await;
            }
        })
    }

    async fn grace_expired(&self, session_id: u64) {
        let still_down = {
            let mut guard = self.state.lock().await;
            match guard.session.as_mut().filter(|s| s.id == session_id) {
                Some(session) => {
                    session.grace = None;
                    session.connectivity == ConnectivityState::Disconnected
                }
                None => false,
            }
        };
        if still_down {
            self.end_session(Some(session_id), "connection lost", true)
                .await;
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    fn stop_ringing(&self, session: &mut CallSession) {
        if session.ringing {
            session.ringing = false;
            self.emit(CallEvent::RingingStopped);
        }
    }

    /// Tear down the active session (or only `session_id` when given)
    async fn end_session(&self, session_id: Option<u64>, reason: &str, notify_remote: bool) -> bool {
        let mut session = {
            let mut guard = self.state.lock().await;
            let matches = guard
                .session
                .as_ref()
                .map(|s| session_id.map_or(true, |id| s.id == id))
                .unwrap_or(false);
            if !matches {
                return false;
            }
            let Some(session) = guard.session.take() else {
                return false;
            };
            guard.pending.remove(&session.peer_id);
            session
        };

        if let Some(grace) = session.grace.take() {
            grace.abort();
        }
        session.context.close().await;
        if let Some(mut media) = session.media.take() {
            media.stop();
        }
        self.stop_ringing(&mut session);

        let final_state = session
            .state
            .transition(CallTrigger::End)
            .unwrap_or(CallState::Idle);
        info!("Call with {} ended: {}", session.peer_id, reason);
        self.emit(CallEvent::StateChanged {
            peer_id: Some(session.peer_id.clone()),
            state: final_state,
        });
        self.emit(CallEvent::CallEnded {
            peer_id: session.peer_id.clone(),
            reason: reason.to_string(),
        });

        if notify_remote {
            let end = Signal::End {
                call_id: session.call_id.clone(),
                reason: None,
            };
            if let Err(e) = self.relay.send_signal(&session.peer_id, end).await {
                debug!("CALL_END to {} failed: {}", session.peer_id, e);
            }
        }
        true
    }
}

/// Attach local audio and produce the local description of `sdp_type`
async fn describe_local(
    context: &mut dyn NegotiationContext,
    media: &dyn LocalMedia,
    sdp_type: SdpType,
) -> Result<SessionDescription> {
    context.attach_media(media).await?;
    match sdp_type {
        SdpType::Answer => context.create_answer().await,
        _ => context.create_offer().await,
    }
}

fn queue_candidate(
    pending: &mut HashMap<PeerId, Vec<QueuedCandidate>>,
    peer_id: &PeerId,
    call_id: String,
    candidate: IceCandidate,
) {
    let queue = pending.entry(peer_id.clone()).or_default();
    if queue.len() >= MAX_QUEUED_CANDIDATES {
        debug!("Candidate queue for {} is full, dropping", peer_id);
        return;
    }
    queue.push(QueuedCandidate { call_id, candidate });
}

/// Forget the candidates `peer_id` queued for `call_id`
fn discard_queued(
    pending: &mut HashMap<PeerId, Vec<QueuedCandidate>>,
    peer_id: &PeerId,
    call_id: &str,
) {
    if let Some(queue) = pending.get_mut(peer_id) {
        queue.retain(|queued| queued.call_id != call_id);
        if queue.is_empty() {
            pending.remove(peer_id);
        }
    }
}

/// Apply and clear the candidates queued for `peer_id`; failures stay queued
///
/// Candidates queued under another call id are stale and dropped.
async fn flush_candidates(
    context: &mut dyn NegotiationContext,
    peer_id: &PeerId,
    call_id: &str,
    pending: &mut HashMap<PeerId, Vec<QueuedCandidate>>,
) {
    let Some(queued) = pending.remove(peer_id) else {
        return;
    };
    let (current, stale): (Vec<_>, Vec<_>) = queued
        .into_iter()
        .partition(|queued| queued.call_id == call_id);
    if !stale.is_empty() {
        debug!("Dropping {} stale candidates from {}", stale.len(), peer_id);
    }
    debug!("Applying {} queued candidates from {}", current.len(), peer_id);
    let mut failed = Vec::new();
    for queued in current {
        if let Err(e) = context.add_ice_candidate(queued.candidate.clone()).await {
            debug!("Queued candidate from {} rejected: {}", peer_id, e);
            failed.push(queued);
        }
    }
    if !failed.is_empty() {
        pending.insert(peer_id.clone(), failed);
    }
}
