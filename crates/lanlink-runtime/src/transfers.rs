//! Inbound file transfer registry
//!
//! A transfer is opened by FILE_OFFER, grows with each FILE_CHUNK and is closed by
//! FILE_COMPLETE. Completion verifies the byte count against the offered size.
//! Every failure removes the partial file and drops the transfer.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lanlink_core::file_transfer::{decode_chunk, destination_candidates, sanitize_file_name};
use lanlink_core::protocol::FileMeta;
use lanlink_core::{LanError, PeerId, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Who is sending, and where acknowledgements go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSender {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
}

struct IncomingTransfer {
    name: String,
    path: PathBuf,
    sink: File,
    declared_size: u64,
    received_bytes: u64,
    sender: TransferSender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub file_id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub sender: TransferSender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub file_id: String,
    pub name: String,
    pub peer_id: PeerId,
    pub reason: String,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Appended { received_bytes: u64 },
    Unknown,
    Failed(TransferFailure),
}

#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(CompletedTransfer),
    Unknown,
    Failed(TransferFailure),
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct IncomingTransfers {
    transfers: HashMap<String, IncomingTransfer>,
}

impl IncomingTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Create the sink for an offer and return the destination path
    pub async fn open(
        &mut self,
        download_dir: &Path,
        offer: &FileMeta,
        sender: TransferSender,
    ) -> Result<PathBuf> {
        if self.transfers.contains_key(&offer.id) {
            return Err(LanError::invalid_payload(format!(
                "duplicate offer for file {}",
                offer.id
            )));
        }
        tokio::fs::create_dir_all(download_dir).await?;

        let name = sanitize_file_name(&offer.name);
        let (path, sink) = create_unique(download_dir, &name).await?;
        info!(
            "Receiving {} ({} bytes) from {} into {}",
            name,
            offer.size,
            sender.peer_id,
            path.display()
        );
        self.transfers.insert(
            offer.id.clone(),
            IncomingTransfer {
                name,
                path: path.clone(),
                sink,
                declared_size: offer.size,
                received_bytes: 0,
                sender,
            },
        );
        Ok(path)
    }

    /// Decode and append one chunk; `index`/`total` are informational only
    pub async fn append(&mut self, file_id: &str, data: &str) -> ChunkOutcome {
        let Some(transfer) = self.transfers.get_mut(file_id) else {
            debug!("Chunk for unknown file {}", file_id);
            return ChunkOutcome::Unknown;
        };
        let written = match decode_chunk(data) {
            Ok(bytes) => transfer
                .sink
                .write_all(&bytes)
                .await
                .map(|_| bytes.len() as u64)
                .map_err(LanError::from),
            Err(e) => Err(e),
        };
        match written {
            Ok(count) => {
                transfer.received_bytes += count;
                ChunkOutcome::Appended {
                    received_bytes: transfer.received_bytes,
                }
            }
            Err(e) => ChunkOutcome::Failed(self.fail(file_id, e.to_string()).await),
        }
    }

    /// Flush and verify a transfer, discarding its state either way
    pub async fn complete(&mut self, file_id: &str) -> CompleteOutcome {
        let Some(mut transfer) = self.transfers.remove(file_id) else {
            debug!("Completion for unknown file {}", file_id);
            return CompleteOutcome::Unknown;
        };
        let flushed = async {
            transfer.sink.flush().await?;
            transfer.sink.sync_all().await
        }
        .await;

        let failure = match flushed {
            Err(e) => Some(format!("failed to flush: {}", e)),
            Ok(()) if transfer.received_bytes != transfer.declared_size => Some(format!(
                "received {} bytes, expected {}",
                transfer.received_bytes, transfer.declared_size
            )),
            Ok(()) => None,
        };
        if let Some(reason) = failure {
            return CompleteOutcome::Failed(discard(file_id, transfer, reason).await);
        }

        info!(
            "Received {} ({} bytes) from {}",
            transfer.name, transfer.received_bytes, transfer.sender.peer_id
        );
        CompleteOutcome::Completed(CompletedTransfer {
            file_id: file_id.to_string(),
            name: transfer.name,
            path: transfer.path,
            size: transfer.received_bytes,
            sender: transfer.sender,
        })
    }

    /// Drop every open transfer and remove the partial files
    pub async fn abort_all(&mut self) -> Vec<TransferFailure> {
        let ids: Vec<String> = self.transfers.keys().cloned().collect();
        let mut failures = Vec::with_capacity(ids.len());
        for id in ids {
            failures.push(self.fail(&id, "transfer aborted".to_string()).await);
        }
        failures
    }

    async fn fail(&mut self, file_id: &str, reason: String) -> TransferFailure {
        match self.transfers.remove(file_id) {
            Some(transfer) => discard(file_id, transfer, reason).await,
            None => TransferFailure {
                file_id: file_id.to_string(),
                name: String::new(),
                peer_id: PeerId::new(""),
                reason,
            },
        }
    }
}

async fn discard(file_id: &str, transfer: IncomingTransfer, reason: String) -> TransferFailure {
    warn!(
        "Abandoning transfer of {} from {}: {}",
        transfer.name, transfer.sender.peer_id, reason
    );
    drop(transfer.sink);
    if let Err(e) = tokio::fs::remove_file(&transfer.path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", transfer.path.display(), e);
        }
    }
    TransferFailure {
        file_id: file_id.to_string(),
        name: transfer.name,
        peer_id: transfer.sender.peer_id,
        reason,
    }
}

/// Create the first free candidate atomically, so concurrent offers never share a path
async fn create_unique(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    for candidate in destination_candidates(dir, name).take(MAX_NAME_ATTEMPTS as usize) {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(LanError::invalid_input(format!(
        "no free file name for {} in {}",
        name,
        dir.display()
    )))
}
