//! Inbound WebSocket server
//!
//! Listens on an ephemeral port and runs each accepted connection in its own task.
//! Shutdown closes every connection and waits for its task to finish.
//! A connection must open with HELLO; anything else closes it. After the handshake
//! PING and REQUEST_TODAY_SUMMARY are answered in place, and every other message is
//! handed to the [`InboundHandler`] in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lanlink_core::{normalize_address, HandshakePolicy, LanMessage, Result, TodaySummary};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::client::ws_error;

/// Where an inbound message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Normalized remote address
    pub address: String,
    /// Ephemeral source port of the connection, not the peer's listening port
    pub port: u16,
}

impl RemoteEndpoint {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            address: normalize_address(&addr.ip().to_string()),
            port: addr.port(),
        }
    }
}

/// Receives handshaken traffic from the server
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Fire-and-forget messages: chat, files, acks and signaling
    async fn handle_message(&self, message: LanMessage, remote: RemoteEndpoint);

    /// Produce the local summary for a REQUEST_TODAY_SUMMARY
    async fn local_summary(&self) -> Result<TodaySummary>;
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

pub struct LanServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl LanServer {
    /// Bind on `bind_address` with an ephemeral port and start accepting
    pub async fn bind(
        bind_address: &str,
        policy: HandshakePolicy,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((bind_address, 0)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let policy = Arc::new(policy);

        info!("LAN server listening on {}", local_addr);
        let accept_task = tokio::spawn(accept_loop(listener, policy, handler, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every open connection and wait for their tasks
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_task.await {
            if !e.is_cancelled() {
                error!("LAN server accept task failed: {}", e);
            }
        }
        info!("LAN server on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    policy: Arc<HandshakePolicy>,
    handler: Arc<dyn InboundHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                log_connection_exit(finished);
            }
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    let connection = ServerConnection {
                        remote: RemoteEndpoint::from_socket_addr(addr),
                        policy: policy.clone(),
                        handler: handler.clone(),
                    };
                    let shutdown = shutdown.clone();
                    connections.spawn(async move { connection.run(stream, shutdown).await });
                }
                Err(e) => warn!("Accept error: {}", e),
            },
        }
    }
    drop(listener);

    if !connections.is_empty() {
        debug!("Waiting for {} connections to close", connections.len());
    }
    while let Some(finished) = connections.join_next().await {
        log_connection_exit(finished);
    }
}

fn log_connection_exit(finished: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            error!("Connection task panicked: {}", e);
        }
    }
}

// ----------------------------------------------------------------------------
// Per-connection Task
// ----------------------------------------------------------------------------

struct ServerConnection {
    remote: RemoteEndpoint,
    policy: Arc<HandshakePolicy>,
    handler: Arc<dyn InboundHandler>,
}

enum Flow {
    Continue,
    Close,
}

impl ServerConnection {
    async fn run(self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let upgraded = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            upgraded = accept_async(stream) => upgraded,
        };
        let mut ws = match upgraded {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket upgrade from {} failed: {}", self.remote.address, e);
                return;
            }
        };

        let mut handshaken = false;
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                frame = ws.next() => frame,
            };
            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Connection from {} errored: {}", self.remote.address, e);
                    break;
                }
            };

            let message = match LanMessage::decode(&text) {
                Ok(message) => message,
                Err(e) if handshaken => {
                    warn!("Dropping frame from {}: {}", self.remote.address, e);
                    continue;
                }
                Err(e) => {
                    warn!("Closing {} before handshake: {}", self.remote.address, e);
                    break;
                }
            };
            trace!("<- {} {}", self.remote.address, message.message_type());

            let flow = if handshaken {
                self.dispatch(&mut ws, message, &mut shutdown).await
            } else {
                let flow = self.handshake(&mut ws, message).await;
                handshaken = matches!(flow, Flow::Continue);
                flow
            };
            if let Flow::Close = flow {
                break;
            }
        }
        let _ = ws.close(None).await;
    }

    async fn handshake(&self, ws: &mut WebSocketStream<TcpStream>, message: LanMessage) -> Flow {
        let remote_hello = match message {
            LanMessage::Hello { payload } => payload,
            other => {
                warn!(
                    "{} sent {} before HELLO, closing",
                    self.remote.address,
                    other.message_type()
                );
                return Flow::Close;
            }
        };
        if let Err(reason) = self.policy.check(&remote_hello) {
            warn!("Rejecting {}: {}", self.remote.address, reason);
            return Flow::Close;
        }
        debug!(
            "Handshake from {} ({}) accepted",
            self.remote.address, remote_hello.device
        );
        self.reply_hello(ws).await
    }

    async fn reply_hello(&self, ws: &mut WebSocketStream<TcpStream>) -> Flow {
        let reply = LanMessage::HelloOk {
            payload: self.policy.local().clone(),
        };
        match send(ws, &reply).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                debug!("Failed to reply HELLO_OK to {}: {}", self.remote.address, e);
                Flow::Close
            }
        }
    }

    async fn dispatch(
        &self,
        ws: &mut WebSocketStream<TcpStream>,
        message: LanMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Flow {
        match message {
            LanMessage::Hello { .. } => self.reply_hello(ws).await,
            LanMessage::Ping => match send(ws, &LanMessage::Pong).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            },
            LanMessage::RequestTodaySummary { request_id } => {
                let summary = tokio::select! {
                    biased;
                    _ = shutdown.changed() => return Flow::Close,
                    summary = self.handler.local_summary() => summary,
                };
                match summary {
                    Ok(payload) => {
                        let reply = LanMessage::TodaySummary {
                            request_id,
                            payload,
                        };
                        if send(ws, &reply).await.is_err() {
                            return Flow::Close;
                        }
                    }
                    Err(e) => warn!("Local summary for {} failed: {}", self.remote.address, e),
                }
                Flow::Continue
            }
            unsolicited @ (LanMessage::HelloOk { .. }
            | LanMessage::Pong
            | LanMessage::TodaySummary { .. }) => {
                debug!(
                    "Ignoring unsolicited {} from {}",
                    unsolicited.message_type(),
                    self.remote.address
                );
                Flow::Continue
            }
            other => {
                self.handler.handle_message(other, self.remote.clone()).await;
                Flow::Continue
            }
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: &LanMessage) -> Result<()> {
    let text = message.to_json()?;
    ws.send(Message::Text(text)).await.map_err(ws_error)
}
