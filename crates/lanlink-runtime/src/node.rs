//! LanLink Node
//!
//! Owns the server, discovery, peer directory, chat log, inbound transfer registry
//! and the local summary request table, and exposes the operations a UI calls.
//!
//! Everything the node learns is reported on one [`AppEvent`] channel, taken once
//! with [`LanNode::take_event_receiver`]. Call signaling is only relayed here; a
//! [`CallManager`](crate::CallManager) consumes it through [`LanNode::signaling_relay`].

use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use lanlink_core::protocol::{ChatAckPayload, FileAckPayload};
use lanlink_core::{
    AppEvent, ChatDirection, ChatEntry, ChatLog, ChatMessagePayload, FileMeta, HandshakePolicy,
    HelloPayload, LanConfig, LanError, LanMessage, Peer, PeerDirectory, PeerId, Result,
    SenderMeta, Signal, TodaySummary,
};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::call::SignalingRelay;
use crate::client::LanClient;
use crate::discovery::Discovery;
use crate::pending::PendingRequests;
use crate::server::{InboundHandler, LanServer, RemoteEndpoint};
use crate::transfers::{ChunkOutcome, CompleteOutcome, IncomingTransfers, TransferFailure, TransferSender};

/// Services that only exist between `start` and `stop`
struct Running {
    server: LanServer,
    discovery: Option<Discovery>,
}

struct NodeShared {
    config: LanConfig,
    client: LanClient,
    directory: Arc<Mutex<PeerDirectory>>,
    chat_log: Mutex<ChatLog>,
    transfers: Mutex<IncomingTransfers>,
    local_summaries: PendingRequests<TodaySummary>,
    events: mpsc::UnboundedSender<AppEvent>,
    running: Mutex<Option<Running>>,
    port: AtomicU16,
    /// Flips to `true` on stop so in-flight outbound requests fail fast
    shutdown: watch::Sender<bool>,
}

// ----------------------------------------------------------------------------
// Public Node
// ----------------------------------------------------------------------------

pub struct LanNode {
    shared: Arc<NodeShared>,
    event_receiver: Option<mpsc::UnboundedReceiver<AppEvent>>,
}

impl LanNode {
    pub fn new(config: LanConfig) -> Result<Self> {
        config.validate().map_err(LanError::invalid_input)?;
        let (events, event_receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = NodeShared {
            client: LanClient::new(&config),
            config,
            directory: Arc::new(Mutex::new(PeerDirectory::new())),
            chat_log: Mutex::new(ChatLog::new()),
            transfers: Mutex::new(IncomingTransfers::new()),
            local_summaries: PendingRequests::new(),
            events,
            running: Mutex::new(None),
            port: AtomicU16::new(0),
            shutdown,
        };
        Ok(Self {
            shared: Arc::new(shared),
            event_receiver: Some(event_receiver),
        })
    }

    /// Take the application event receiver
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<AppEvent>> {
        self.event_receiver.take()
    }

    /// Start the server and discovery; returns the listening port
    pub async fn start(&self) -> Result<u16> {
        self.shared.start().await
    }

    /// Stop discovery and the server, abort transfers and fail pending requests
    pub async fn stop(&self) {
        self.shared.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.port() != 0
    }

    /// Listening port, `0` when stopped
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::SeqCst)
    }

    pub fn device_name(&self) -> &str {
        &self.shared.config.device_name
    }

    pub fn config(&self) -> &LanConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------------

    pub async fn peers(&self) -> Vec<Peer> {
        self.shared.directory.lock().await.list()
    }

    /// Forget discovered peers and browse again
    pub async fn refresh_peers(&self) -> Vec<Peer> {
        {
            let running = self.shared.running.lock().await;
            match running.as_ref().and_then(|running| running.discovery.as_ref()) {
                Some(discovery) => discovery.refresh().await,
                None => {
                    if self.shared.directory.lock().await.clear_discovered() {
                        self.shared.publish_peers().await;
                    }
                }
            }
        }
        self.peers().await
    }

    pub async fn add_manual_peer(&self, host: &str, port: u32, name: Option<&str>) -> Result<Peer> {
        let peer = self.shared.directory.lock().await.add_manual(host, port, name)?;
        info!("Added manual peer {} ({})", peer.name, peer.socket_target());
        self.shared.publish_peers().await;
        Ok(peer)
    }

    pub async fn remove_manual_peer(&self, peer_id: &PeerId) -> bool {
        let removed = self.shared.directory.lock().await.remove_manual(peer_id);
        if removed {
            info!("Removed manual peer {}", peer_id);
            self.shared.publish_peers().await;
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Round-trip time to a peer
    pub async fn ping(&self, peer_id: &PeerId) -> Result<Duration> {
        let peer = self.shared.peer(peer_id).await?;
        self.shared.client.ping(&peer.host, peer.port).await
    }

    /// Fetch a peer's today summary
    pub async fn get_today_summary(&self, peer_id: &PeerId) -> Result<TodaySummary> {
        self.shared.ensure_running()?;
        let peer = self.shared.peer(peer_id).await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let stopped = self.shared.shutdown.subscribe();

        tokio::select! {
            result = self.shared.client.request_summary(&peer.host, peer.port, &request_id) => result,
            _ = wait_stopped(stopped) => Err(LanError::Stopped),
        }
    }

    /// Answer a `LocalSummaryRequested` event
    pub fn resolve_local_summary(&self, request_id: &str, summary: TodaySummary) -> bool {
        self.shared.local_summaries.resolve(request_id, summary)
    }

    // ------------------------------------------------------------------------
    // Chat and Files
    // ------------------------------------------------------------------------

    /// Send a chat message and record it as `sent`; delivery is confirmed by CHAT_ACK
    pub async fn send_chat(&self, peer_id: &PeerId, text: &str) -> Result<ChatEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LanError::invalid_input("Message text is empty"));
        }
        let from = self.shared.sender_meta()?;
        let peer = self.shared.peer(peer_id).await?;

        let payload = ChatMessagePayload {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            sent_at: chrono::Utc::now(),
            from,
        };
        // The ack can arrive before the send returns
        let entry = ChatEntry::outgoing(peer.id.clone(), &payload);
        self.shared.chat_log.lock().await.record(entry.clone());
        let sent = self
            .shared
            .client
            .send_message(&peer.host, peer.port, &LanMessage::ChatMessage { payload })
            .await;
        if let Err(e) = sent {
            self.shared.chat_log.lock().await.discard(&entry.id);
            return Err(e);
        }
        debug!("Chat {} sent to {}", entry.id, peer.id);
        Ok(entry)
    }

    /// Stream a regular file to a peer; delivery is confirmed by FILE_ACK
    pub async fn send_file(&self, peer_id: &PeerId, path: &Path) -> Result<ChatEntry> {
        let from = self.shared.sender_meta()?;
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(LanError::NotAFile {
                path: path.display().to_string(),
            });
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| LanError::NotAFile {
                path: path.display().to_string(),
            })?;
        let peer = self.shared.peer(peer_id).await?;

        let meta = FileMeta::describe(&name, metadata.len());
        info!("Sending {} ({} bytes) to {}", meta.name, meta.size, peer.id);
        let entry = ChatEntry::file(
            peer.id.clone(),
            &meta.id,
            &meta.name,
            ChatDirection::Out,
            from.clone(),
        );
        self.shared.chat_log.lock().await.record(entry.clone());

        let sent = self
            .shared
            .client
            .send_file(&peer.host, peer.port, path, &meta, &from)
            .await;
        if let Err(e) = sent {
            warn!("Sending {} to {} failed: {}", meta.name, peer.id, e);
            self.shared.chat_log.lock().await.discard(&meta.id);
            return Err(e);
        }
        Ok(entry)
    }

    /// Snapshot of the chat log
    pub async fn chat_log(&self) -> Vec<ChatEntry> {
        self.shared.chat_log.lock().await.entries().to_vec()
    }

    // ------------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------------

    /// Relay a call signal to a peer
    pub async fn send_signaling(&self, peer_id: &PeerId, signal: Signal) -> Result<()> {
        self.shared.send_signaling(peer_id, signal).await
    }

    /// Relay handle for a [`CallManager`](crate::CallManager)
    pub fn signaling_relay(&self) -> Arc<dyn SignalingRelay> {
        Arc::new(NodeSignaling {
            shared: self.shared.clone(),
        })
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

impl NodeShared {
    async fn start(self: &Arc<Self>) -> Result<u16> {
        let mut running = self.running.lock().await;
        if let Some(active) = running.as_ref() {
            debug!("Node already running on port {}", active.server.port());
            return Ok(active.server.port());
        }

        let handler: Arc<dyn InboundHandler> = Arc::new(NodeHandler {
            shared: Arc::downgrade(self),
        });
        let server = LanServer::bind(
            &self.config.bind_address,
            HandshakePolicy::from_config(&self.config),
            handler,
        )
        .await?;
        let port = server.port();
        self.port.store(port, Ordering::SeqCst);
        self.shutdown.send_replace(false);

        let discovery = if self.config.discovery.enabled {
            match Discovery::start(
                &self.config.discovery,
                &HelloPayload::from_config(&self.config),
                port,
                self.directory.clone(),
                self.events.clone(),
            )
            .await
            {
                Ok(discovery) => Some(discovery),
                Err(e) => {
                    warn!("Discovery unavailable, only manual peers will work: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Node {} started on port {}",
            self.config.device_name, port
        );
        *running = Some(Running { server, discovery });
        Ok(port)
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        if let Some(discovery) = running.discovery {
            discovery.stop().await;
        }
        running.server.shutdown().await;

        let aborted = self.transfers.lock().await.abort_all().await;
        for failure in aborted {
            self.report_transfer_failure(failure);
        }
        let rejected = self.local_summaries.reject_all(|| LanError::Stopped);
        if rejected > 0 {
            debug!("Rejected {} pending summary requests", rejected);
        }

        self.shutdown.send_replace(true);
        self.port.store(0, Ordering::SeqCst);
        info!("Node {} stopped", self.config.device_name);
    }

    fn ensure_running(&self) -> Result<u16> {
        match self.port.load(Ordering::SeqCst) {
            0 => Err(LanError::NotStarted),
            port => Ok(port),
        }
    }

    fn sender_meta(&self) -> Result<SenderMeta> {
        let port = self.ensure_running()?;
        Ok(SenderMeta::new(self.config.device_name.clone(), port))
    }

    async fn peer(&self, peer_id: &PeerId) -> Result<Peer> {
        self.directory.lock().await.get(peer_id)
    }

    fn emit(&self, event: AppEvent) {
        debug!("Event {}", event.name());
        let _ = self.events.send(event);
    }

    async fn publish_peers(&self) {
        let peers = self.directory.lock().await.list();
        self.emit(AppEvent::PeersUpdated { peers });
    }

    async fn send_signaling(&self, peer_id: &PeerId, signal: Signal) -> Result<()> {
        let from = self.sender_meta()?;
        let peer = self.peer(peer_id).await?;
        debug!("Relaying {} to {}", signal.call_id(), peer.id);
        self.client
            .send_message(&peer.host, peer.port, &signal.into_message(Some(from)))
            .await
    }
}

// ----------------------------------------------------------------------------
// Inbound Traffic
// ----------------------------------------------------------------------------

impl NodeShared {
    /// Reconcile a sender with the directory, publishing the listing if it grew
    async fn contact(&self, name: Option<&str>, host: &str, port: u16) -> Option<Peer> {
        let upsert = self.directory.lock().await.upsert_from_contact(name, host, port)?;
        if upsert.created {
            info!("New contact {} at {}", upsert.peer.name, upsert.peer.socket_target());
            self.publish_peers().await;
        }
        Some(upsert.peer)
    }

    /// Deliver an acknowledgement on its own connection
    fn spawn_reply(&self, host: String, port: u16, message: LanMessage) {
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_message(&host, port, &message).await {
                debug!("{} to {}:{} failed: {}", message.message_type(), host, port, e);
            }
        });
    }

    fn report_transfer_failure(&self, failure: TransferFailure) {
        self.emit(AppEvent::FileTransferFailed {
            peer_id: failure.peer_id,
            file_id: failure.file_id,
            name: failure.name,
            reason: failure.reason,
        });
    }

    async fn on_message(&self, message: LanMessage, remote: RemoteEndpoint) {
        match message {
            LanMessage::ChatMessage { payload } => self.on_chat(payload, remote).await,
            LanMessage::ChatAck { payload } => self.on_chat_ack(payload, remote).await,
            LanMessage::FileOffer { payload } => {
                let sender = self.transfer_sender(payload.from.as_ref(), &remote).await;
                let peer_id = sender.peer_id.clone();
                let opened = self
                    .transfers
                    .lock()
                    .await
                    .open(&self.config.download_dir, &payload.file, sender)
                    .await;
                if let Err(e) = opened {
                    warn!("Cannot accept {} from {}: {}", payload.file.name, peer_id, e);
                    self.emit(AppEvent::FileTransferFailed {
                        peer_id,
                        file_id: payload.file.id,
                        name: payload.file.name,
                        reason: e.to_string(),
                    });
                }
            }
            LanMessage::FileChunk { payload } => {
                let outcome = self
                    .transfers
                    .lock()
                    .await
                    .append(&payload.file_id, &payload.data)
                    .await;
                if let ChunkOutcome::Failed(failure) = outcome {
                    self.report_transfer_failure(failure);
                }
            }
            LanMessage::FileComplete { payload } => {
                let outcome = self.transfers.lock().await.complete(&payload.file_id).await;
                match outcome {
                    CompleteOutcome::Completed(done) => {
                        let from = payload.from.clone().unwrap_or_else(|| {
                            SenderMeta::new(done.sender.host.clone(), done.sender.port)
                        });
                        self.chat_log.lock().await.record(ChatEntry::file(
                            done.sender.peer_id.clone(),
                            &done.file_id,
                            &done.name,
                            ChatDirection::In,
                            from,
                        ));
                        self.emit(AppEvent::FileReceived {
                            peer_id: done.sender.peer_id.clone(),
                            name: done.name,
                            size: done.size,
                            file_path: done.path,
                        });
                        if let Ok(local) = self.sender_meta() {
                            self.spawn_reply(
                                done.sender.host,
                                done.sender.port,
                                LanMessage::FileAck {
                                    payload: FileAckPayload {
                                        file_id: done.file_id,
                                        from: Some(local),
                                    },
                                },
                            );
                        }
                    }
                    CompleteOutcome::Failed(failure) => self.report_transfer_failure(failure),
                    CompleteOutcome::Unknown => {}
                }
            }
            LanMessage::FileAck { payload } => {
                self.chat_log.lock().await.mark_delivered(&payload.file_id);
                let from = payload.from.as_ref();
                let port = from.map(|from| from.port).unwrap_or(remote.port);
                if let Some(peer) = self
                    .contact(from.map(|from| from.name.as_str()), &remote.address, port)
                    .await
                {
                    self.emit(AppEvent::FileAck {
                        peer_id: peer.id,
                        file_id: payload.file_id,
                    });
                }
            }
            LanMessage::CallOffer { .. }
            | LanMessage::CallAnswer { .. }
            | LanMessage::IceCandidate { .. }
            | LanMessage::CallEnd { .. } => self.on_signaling(message, remote).await,
            other => debug!(
                "Unhandled {} from {}",
                other.message_type(),
                remote.address
            ),
        }
    }

    async fn on_chat(&self, payload: ChatMessagePayload, remote: RemoteEndpoint) {
        let Some(peer) = self
            .contact(Some(&payload.from.name), &remote.address, payload.from.port)
            .await
        else {
            warn!("Dropping chat from {} with no usable sender", remote.address);
            return;
        };

        let entry = ChatEntry::incoming(peer.id.clone(), &payload);
        self.chat_log.lock().await.record(entry.clone());
        self.emit(AppEvent::ChatMessageReceived {
            peer_id: peer.id,
            message: entry,
        });

        if let Ok(local) = self.sender_meta() {
            self.spawn_reply(
                remote.address,
                payload.from.port,
                LanMessage::ChatAck {
                    payload: ChatAckPayload {
                        message_id: payload.id,
                        from: Some(local),
                    },
                },
            );
        }
    }

    async fn on_chat_ack(&self, payload: ChatAckPayload, remote: RemoteEndpoint) {
        if !self.chat_log.lock().await.mark_delivered(&payload.message_id) {
            debug!("Ack for unknown message {}", payload.message_id);
        }
        let from = payload.from.as_ref();
        let port = from.map(|from| from.port).unwrap_or(remote.port);
        if let Some(peer) = self
            .contact(from.map(|from| from.name.as_str()), &remote.address, port)
            .await
        {
            self.emit(AppEvent::ChatAck {
                peer_id: peer.id,
                message_id: payload.message_id,
            });
        }
    }

    async fn transfer_sender(
        &self,
        from: Option<&SenderMeta>,
        remote: &RemoteEndpoint,
    ) -> TransferSender {
        let port = from.map(|from| from.port).unwrap_or(remote.port);
        let peer_id = self
            .contact(from.map(|from| from.name.as_str()), &remote.address, port)
            .await
            .map(|peer| peer.id)
            .unwrap_or_else(|| PeerId::manual(&remote.address, port));
        TransferSender {
            peer_id,
            host: remote.address.clone(),
            port,
        }
    }

    /// Attribute a call signal to the advertised sender, or by address alone without one
    async fn on_signaling(&self, message: LanMessage, remote: RemoteEndpoint) {
        let Some(signal) = Signal::from_message(&message) else {
            return;
        };
        let peer = match message.sender() {
            Some(from) => self.contact(Some(&from.name), &remote.address, from.port).await,
            None => self.directory.lock().await.find_by_host(&remote.address),
        };
        match peer {
            Some(peer) => self.emit(AppEvent::Signaling {
                peer_id: peer.id,
                signal,
            }),
            None => warn!(
                "Dropping {} from unknown host {}",
                message.message_type(),
                remote.address
            ),
        }
    }

    /// Ask the UI for the local summary and wait for its answer
    async fn local_summary(&self) -> Result<TodaySummary> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let receiver = self.local_summaries.register(&request_id);
        self.emit(AppEvent::LocalSummaryRequested {
            request_id: request_id.clone(),
        });
        self.local_summaries
            .wait(
                &request_id,
                receiver,
                self.config.local_summary_timeout(),
                "local summary",
            )
            .await
    }
}

/// Server-side handler; weak so the running server never keeps the node alive
struct NodeHandler {
    shared: Weak<NodeShared>,
}

#[async_trait]
impl InboundHandler for NodeHandler {
    async fn handle_message(&self, message: LanMessage, remote: RemoteEndpoint) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_message(message, remote).await;
        }
    }

    async fn local_summary(&self) -> Result<TodaySummary> {
        match self.shared.upgrade() {
            Some(shared) => shared.local_summary().await,
            None => Err(LanError::Stopped),
        }
    }
}

/// [`SignalingRelay`] backed by a node's directory and client
struct NodeSignaling {
    shared: Arc<NodeShared>,
}

#[async_trait]
impl SignalingRelay for NodeSignaling {
    async fn send_signal(&self, peer_id: &PeerId, signal: Signal) -> Result<()> {
        self.shared.send_signaling(peer_id, signal).await
    }

    async fn peer_name(&self, peer_id: &PeerId) -> Option<String> {
        self.shared.peer(peer_id).await.ok().map(|peer| peer.name)
    }
}

async fn wait_stopped(mut stopped: watch::Receiver<bool>) {
    while !*stopped.borrow_and_update() {
        if stopped.changed().await.is_err() {
            break;
        }
    }
}
