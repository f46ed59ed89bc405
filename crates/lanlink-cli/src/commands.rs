//! Command handlers for the LanLink CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lanlink_runtime::{AppEvent, LanConfig, LanError, LanNode, Peer, TodaySummary};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Run { summary } => {
                let summary_file = summary.or_else(|| config.cli.summary_file.clone());
                Self::handle_run_command(config, summary_file).await
            }
            Commands::Peers { watch } => Self::handle_peers_command(config, watch).await,
            Commands::Ping { host, port } => Self::handle_ping_command(config, &host, port).await,
            Commands::Summary { host, port } => {
                Self::handle_summary_command(config, &host, port).await
            }
            Commands::Chat { host, port, text } => {
                Self::handle_chat_command(config, &host, port, &text).await
            }
            Commands::Send { host, port, path } => {
                Self::handle_send_command(config, &host, port, &path).await
            }
            Commands::Config => {
                println!("{}", AppConfig::example_config()?);
                Ok(())
            }
        }
    }

    /// Run until Ctrl+C, logging events and answering summary requests
    async fn handle_run_command(config: AppConfig, summary_file: Option<PathBuf>) -> Result<()> {
        let (node, mut events) = start_node(config.node).await?;
        info!(
            "{} listening on port {}. Press Ctrl+C to stop",
            node.device_name(),
            node.port()
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(AppEvent::LocalSummaryRequested { request_id }) => {
                        let summary = match summary_file.as_deref() {
                            Some(path) => match load_summary(path) {
                                Ok(summary) => summary,
                                Err(e) => {
                                    warn!("{}", e);
                                    TodaySummary::default()
                                }
                            },
                            None => TodaySummary::default(),
                        };
                        node.resolve_local_summary(&request_id, summary);
                    }
                    Some(event) => log_event(&event),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }
        node.stop().await;
        Ok(())
    }

    /// Print peers found within the linger window, or keep watching
    async fn handle_peers_command(config: AppConfig, watch: bool) -> Result<()> {
        let linger = config.cli.linger();
        let (node, mut events) = start_node(config.node).await?;

        if watch {
            info!("Watching for peers... Press Ctrl+C to stop");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(AppEvent::PeersUpdated { peers }) => print_peers(&peers),
                        Some(_) => {}
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        } else {
            tokio::time::sleep(linger).await;
            print_peers(&node.peers().await);
        }
        node.stop().await;
        Ok(())
    }

    async fn handle_ping_command(config: AppConfig, host: &str, port: u32) -> Result<()> {
        let node = LanNode::new(one_shot(config))?;
        let peer = node.add_manual_peer(host, port, None).await?;
        let rtt = node.ping(&peer.id).await?;
        println!("Reply from {}: {} ms", peer.socket_target(), rtt.as_millis());
        Ok(())
    }

    async fn handle_summary_command(config: AppConfig, host: &str, port: u32) -> Result<()> {
        let (node, _events) = start_node(one_shot(config)).await?;
        let result = async {
            let peer = node.add_manual_peer(host, port, None).await?;
            node.get_today_summary(&peer.id).await
        }
        .await;
        node.stop().await;

        let summary = result?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }

    async fn handle_chat_command(config: AppConfig, host: &str, port: u32, text: &str) -> Result<()> {
        let linger = config.cli.linger();
        let (node, mut events) = start_node(one_shot(config)).await?;
        let outcome = async {
            let peer = node.add_manual_peer(host, port, None).await?;
            let entry = node.send_chat(&peer.id, text).await?;
            println!("Message {} sent to {}", entry.id, peer.socket_target());
            let acked = wait_for_ack(&mut events, linger, |event| {
                matches!(event, AppEvent::ChatAck { message_id, .. } if *message_id == entry.id)
            })
            .await;
            Ok::<_, CliError>((peer, acked))
        }
        .await;
        node.stop().await;

        let (peer, acked) = outcome?;
        if !acked {
            return Err(CliError::Unacknowledged(peer.socket_target()));
        }
        println!("Delivered");
        Ok(())
    }

    async fn handle_send_command(config: AppConfig, host: &str, port: u32, path: &Path) -> Result<()> {
        let linger = config.cli.linger();
        let (node, mut events) = start_node(one_shot(config)).await?;
        let outcome = async {
            let peer = node.add_manual_peer(host, port, None).await?;
            let entry = node.send_file(&peer.id, path).await?;
            println!("Sent {} to {}", entry.text, peer.socket_target());
            let acked = wait_for_ack(&mut events, linger, |event| {
                matches!(event, AppEvent::FileAck { file_id, .. } if *file_id == entry.id)
            })
            .await;
            Ok::<_, CliError>((peer, acked))
        }
        .await;
        node.stop().await;

        let (peer, acked) = outcome?;
        if !acked {
            return Err(CliError::Unacknowledged(peer.socket_target()));
        }
        println!("Received by peer");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

async fn start_node(
    config: LanConfig,
) -> Result<(LanNode, mpsc::UnboundedReceiver<AppEvent>)> {
    let mut node = LanNode::new(config)?;
    let events = node
        .take_event_receiver()
        .ok_or(LanError::NotStarted)?;
    node.start().await?;
    Ok((node, events))
}

/// One-shot commands talk to a known address and never advertise
fn one_shot(config: AppConfig) -> LanConfig {
    let mut node = config.node;
    node.discovery.enabled = false;
    node
}

async fn wait_for_ack<F>(
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
    linger: Duration,
    mut is_ack: F,
) -> bool
where
    F: FnMut(&AppEvent) -> bool,
{
    tokio::time::timeout(linger, async {
        while let Some(event) = events.recv().await {
            if is_ack(&event) {
                return true;
            }
            debug!("Skipping {} while waiting for ack", event.name());
        }
        false
    })
    .await
    .unwrap_or(false)
}

fn load_summary(path: &Path) -> anyhow::Result<TodaySummary> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let summary = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a summary", path.display()))?;
    Ok(summary)
}

fn print_peers(peers: &[Peer]) {
    if peers.is_empty() {
        println!("No peers found");
        return;
    }
    println!("{:<28} {:<24} {:<10}", "NAME", "ADDRESS", "ORIGIN");
    for peer in peers {
        println!(
            "{:<28} {:<24} {:<10}",
            peer.name,
            peer.socket_target(),
            format!("{:?}", peer.origin).to_lowercase()
        );
    }
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::PeersUpdated { peers } => info!("{} peers known", peers.len()),
        AppEvent::ChatMessageReceived { peer_id, message } => {
            info!("[{}] {}", peer_id, message.text)
        }
        AppEvent::ChatAck { peer_id, message_id } => {
            info!("{} read message {}", peer_id, message_id)
        }
        AppEvent::FileReceived {
            peer_id,
            name,
            size,
            file_path,
        } => info!(
            "Received {} ({} bytes) from {} at {}",
            name,
            size,
            peer_id,
            file_path.display()
        ),
        AppEvent::FileAck { peer_id, file_id } => info!("{} received file {}", peer_id, file_id),
        AppEvent::FileTransferFailed {
            peer_id,
            name,
            reason,
            ..
        } => warn!("Transfer of {} from {} failed: {}", name, peer_id, reason),
        AppEvent::Signaling { peer_id, signal } => {
            info!("Call signal for {} from {} (no audio engine here)", signal.call_id(), peer_id)
        }
        AppEvent::LocalSummaryRequested { request_id } => {
            debug!("Summary request {}", request_id)
        }
    }
}
