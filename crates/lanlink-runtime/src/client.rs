//! Outbound WebSocket client
//!
//! Every operation opens its own connection, performs the HELLO handshake, does its
//! exchange and closes. File transfers keep one connection from offer to completion.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use lanlink_core::file_transfer::{encode_chunk, total_chunks};
use lanlink_core::protocol::{
    FileChunkPayload, FileCompletePayload, FileMeta, FileOfferPayload,
};
use lanlink_core::types::socket_target;
use lanlink_core::{
    HandshakePolicy, LanConfig, LanError, LanMessage, Result, SenderMeta, TodaySummary,
    TransportError,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn ws_error(error: tokio_tungstenite::tungstenite::Error) -> LanError {
    LanError::Transport(TransportError::WebSocket(error.to_string()))
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// One handshaken connection to a remote node
struct Connection {
    ws: WsStream,
    target: String,
}

impl Connection {
    async fn send(&mut self, message: &LanMessage) -> Result<()> {
        trace!("-> {} {}", self.target, message.message_type());
        self.ws
            .send(Message::Text(message.to_json()?))
            .await
            .map_err(ws_error)
    }

    /// Read frames until `select` accepts one; undecodable frames are skipped
    async fn wait_for<T, F>(&mut self, mut select: F) -> Result<T>
    where
        F: FnMut(LanMessage) -> Option<T>,
    {
        while let Some(frame) = self.ws.next().await {
            match frame.map_err(ws_error)? {
                Message::Text(text) => match LanMessage::decode(&text) {
                    Ok(message) => {
                        let message_type = message.message_type();
                        match select(message) {
                            Some(value) => return Ok(value),
                            None => debug!("Ignoring {} from {}", message_type, self.target),
                        }
                    }
                    Err(e) => warn!("Dropping frame from {}: {}", self.target, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(LanError::Transport(TransportError::ConnectionClosed {
            target: self.target.clone(),
        }))
    }

    async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Closing connection to {} failed: {}", self.target, e);
        }
    }
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LanClient {
    policy: HandshakePolicy,
    connect_timeout: Duration,
    file_timeout: Duration,
    chunk_size: usize,
}

impl LanClient {
    pub fn new(config: &LanConfig) -> Self {
        Self {
            policy: HandshakePolicy::from_config(config),
            connect_timeout: config.connect_timeout(),
            file_timeout: config.file_timeout(),
            chunk_size: config.chunk_size,
        }
    }

    /// Connect and complete the handshake within `limit`
    async fn open(&self, host: &str, port: u16, limit: Duration) -> Result<Connection> {
        let target = socket_target(host, port);
        let url = format!("ws://{}", target);
        let limit_ms = limit.as_millis() as u64;

        let (ws, _) = tokio::time::timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| LanError::connection_timeout(&target, limit_ms))?
            .map_err(|e| LanError::connection_failed(&target, e.to_string()))?;
        let mut connection = Connection {
            ws,
            target: target.clone(),
        };

        connection
            .send(&LanMessage::Hello {
                payload: self.policy.local().clone(),
            })
            .await?;
        let remote = tokio::time::timeout(
            limit,
            connection.wait_for(|message| match message {
                LanMessage::HelloOk { payload } => Some(payload),
                _ => None,
            }),
        )
        .await
        .map_err(|_| LanError::connection_timeout(&target, limit_ms))??;

        if let Err(reason) = self.policy.check(&remote) {
            connection.close().await;
            return Err(LanError::handshake_failed(target, reason));
        }
        debug!("Handshake with {} ({}) complete", target, remote.device);
        Ok(connection)
    }

    /// Round-trip a PING and report the elapsed time
    pub async fn ping(&self, host: &str, port: u16) -> Result<Duration> {
        let started = Instant::now();
        self.bounded("ping", async {
            let mut connection = self.open(host, port, self.connect_timeout).await?;
            connection.send(&LanMessage::Ping).await?;
            connection
                .wait_for(|message| matches!(message, LanMessage::Pong).then_some(()))
                .await?;
            connection.close().await;
            Ok(())
        })
        .await?;
        Ok(started.elapsed())
    }

    /// Ask a peer for its summary; replies with another request id are ignored
    pub async fn request_summary(
        &self,
        host: &str,
        port: u16,
        request_id: &str,
    ) -> Result<TodaySummary> {
        self.bounded("summary request", async {
            let mut connection = self.open(host, port, self.connect_timeout).await?;
            connection
                .send(&LanMessage::RequestTodaySummary {
                    request_id: request_id.to_string(),
                })
                .await?;
            let summary = connection
                .wait_for(|message| match message {
                    LanMessage::TodaySummary {
                        request_id: reply_id,
                        payload,
                    } if reply_id == request_id => Some(payload),
                    _ => None,
                })
                .await?;
            connection.close().await;
            Ok(summary)
        })
        .await
    }

    /// Fire-and-forget delivery of a single message
    pub async fn send_message(&self, host: &str, port: u16, message: &LanMessage) -> Result<()> {
        self.bounded(message.message_type(), async {
            let mut connection = self.open(host, port, self.connect_timeout).await?;
            connection.send(message).await?;
            connection.close().await;
            Ok(())
        })
        .await
    }

    /// Stream a file as FILE_OFFER, ordered FILE_CHUNKs and FILE_COMPLETE
    pub async fn send_file(
        &self,
        host: &str,
        port: u16,
        path: &Path,
        meta: &FileMeta,
        from: &SenderMeta,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut connection = self.open(host, port, self.file_timeout).await?;
        let total = total_chunks(meta.size, self.chunk_size);

        self.send_framed(
            &mut connection,
            &LanMessage::FileOffer {
                payload: FileOfferPayload {
                    file: meta.clone(),
                    from: Some(from.clone()),
                },
            },
        )
        .await?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut sent_bytes = 0u64;
        for index in 0..total {
            let read = read_chunk(&mut file, &mut buffer).await?;
            sent_bytes += read as u64;
            self.send_framed(
                &mut connection,
                &LanMessage::FileChunk {
                    payload: FileChunkPayload {
                        file_id: meta.id.clone(),
                        index,
                        total,
                        data: encode_chunk(&buffer[..read]),
                        from: Some(from.clone()),
                    },
                },
            )
            .await?;
        }
        if sent_bytes != meta.size {
            warn!(
                "File {} changed while sending: announced {} bytes, sent {}",
                meta.name, meta.size, sent_bytes
            );
        }

        self.send_framed(
            &mut connection,
            &LanMessage::FileComplete {
                payload: FileCompletePayload {
                    file_id: meta.id.clone(),
                    from: Some(from.clone()),
                },
            },
        )
        .await?;
        connection.close().await;
        debug!("Sent {} ({} chunks) to {}", meta.name, total, socket_target(host, port));
        Ok(())
    }

    async fn send_framed(&self, connection: &mut Connection, message: &LanMessage) -> Result<()> {
        let limit = self.file_timeout;
        tokio::time::timeout(limit, connection.send(message))
            .await
            .map_err(|_| LanError::timeout(message.message_type(), limit.as_millis() as u64))?
    }

    /// Bound a whole exchange by the connect timeout
    async fn bounded<T, F>(&self, operation: &str, exchange: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let limit = self.connect_timeout;
        tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| LanError::timeout(operation, limit.as_millis() as u64))?
    }
}

/// Fill `buffer` from `file`, short only at end of file
async fn read_chunk(file: &mut tokio::fs::File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
