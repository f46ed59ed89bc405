//! UDP multicast service discovery
//!
//! Each node periodically announces `{service, app, device, v, port}` to a shared
//! multicast group and records the announcements of others in the peer directory.
//! A `query` asks everyone to announce now; a `bye` withdraws a node at shutdown.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use lanlink_core::{
    AppEvent, DiscoveryConfig, HelloPayload, LanError, PeerDirectory, Result,
};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Announce,
    Query,
    Bye,
}

/// Service record carried in every discovery datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service: String,
    pub app: String,
    pub device: String,
    pub v: String,
    pub port: u16,
    pub kind: RecordKind,
}

impl ServiceRecord {
    fn with_kind(&self, kind: RecordKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Discovery Service
// ----------------------------------------------------------------------------

struct Shared {
    socket: UdpSocket,
    group: SocketAddrV4,
    local: ServiceRecord,
    config: DiscoveryConfig,
    directory: Arc<Mutex<PeerDirectory>>,
    events: mpsc::UnboundedSender<AppEvent>,
}

pub struct Discovery {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Discovery {
    /// Join the group, announce this node and start browsing
    pub async fn start(
        config: &DiscoveryConfig,
        hello: &HelloPayload,
        port: u16,
        directory: Arc<Mutex<PeerDirectory>>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Result<Self> {
        let group_ip: Ipv4Addr = config.multicast_addr.parse().map_err(|_| {
            LanError::invalid_input(format!("invalid multicast address {}", config.multicast_addr))
        })?;
        let group = SocketAddrV4::new(group_ip, config.multicast_port);

        let (socket, listening) = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port())).await
        {
            Ok(socket) => (socket, true),
            Err(e) => {
                warn!(
                    "Multicast port {} unavailable ({}); discovery will only announce",
                    group.port(),
                    e
                );
                (UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?, false)
            }
        };
        if listening {
            socket.join_multicast_v4(group_ip, Ipv4Addr::UNSPECIFIED)?;
        }
        socket.set_multicast_loop_v4(true)?;

        let local = ServiceRecord {
            service: config.service_type.clone(),
            app: hello.app.clone(),
            device: hello.device.clone(),
            v: hello.v.clone(),
            port,
            kind: RecordKind::Announce,
        };
        let shared = Arc::new(Shared {
            socket,
            group,
            local,
            config: config.clone(),
            directory,
            events,
        });

        let mut tasks = vec![tokio::spawn(announce_loop(shared.clone()))];
        if listening {
            tasks.push(tokio::spawn(receive_loop(shared.clone())));
        }
        shared.send(RecordKind::Query).await;
        info!(
            "Discovery started on {} as {}::{}",
            group, shared.local.device, port
        );
        Ok(Self { shared, tasks })
    }

    /// Forget discovered peers and ask the network to announce again
    pub async fn refresh(&self) {
        if self.shared.directory.lock().await.clear_discovered() {
            self.shared.publish().await;
        }
        self.shared.send(RecordKind::Query).await;
    }

    /// Say goodbye, stop the tasks and clear discovered entries
    pub async fn stop(self) {
        self.shared.send(RecordKind::Bye).await;
        for task in &self.tasks {
            task.abort();
        }
        if self.shared.directory.lock().await.clear_discovered() {
            self.shared.publish().await;
        }
        info!("Discovery stopped");
    }
}

impl Shared {
    async fn send(&self, kind: RecordKind) {
        let record = self.local.with_kind(kind);
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, SocketAddr::V4(self.group)).await {
                    debug!("Discovery send failed: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode service record: {}", e),
        }
    }

    async fn publish(&self) {
        let peers = self.directory.lock().await.list();
        let _ = self.events.send(AppEvent::PeersUpdated { peers });
    }

    fn is_own(&self, record: &ServiceRecord) -> bool {
        record.device == self.local.device && record.port == self.local.port
    }

    async fn handle_record(&self, record: ServiceRecord, source: SocketAddr) {
        if record.service != self.local.service || record.app != self.local.app {
            trace!("Ignoring foreign service record from {}", source);
            return;
        }
        if self.is_own(&record) {
            return;
        }
        let changed = match record.kind {
            RecordKind::Announce => self.directory.lock().await.discovered_up(
                &record.device,
                &source.ip().to_string(),
                record.port,
            ),
            RecordKind::Bye => self
                .directory
                .lock()
                .await
                .discovered_down(&record.device, record.port),
            RecordKind::Query => {
                self.send(RecordKind::Announce).await;
                false
            }
        };
        if changed {
            self.publish().await;
        }
    }
}

async fn announce_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.announce_interval());
    loop {
        ticker.tick().await;
        shared.send(RecordKind::Announce).await;

        let expired = shared
            .directory
            .lock()
            .await
            .expire_discovered(shared.config.peer_ttl(), chrono::Utc::now());
        if !expired.is_empty() {
            shared.publish().await;
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        match shared.socket.recv_from(&mut buffer).await {
            Ok((len, source)) => match serde_json::from_slice::<ServiceRecord>(&buffer[..len]) {
                Ok(record) => shared.handle_record(record, source).await,
                Err(e) => trace!("Ignoring datagram from {}: {}", source, e),
            },
            Err(e) => {
                warn!("Discovery receive failed: {}", e);
                tokio::time::sleep(shared.config.announce_interval()).await;
            }
        }
    }
}
