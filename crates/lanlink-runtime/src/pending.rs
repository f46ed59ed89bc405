//! Correlated request table
//!
//! Each entry waits for exactly one response keyed by request id. Entries leave the
//! table on resolution, on timeout, or when the whole table is rejected at shutdown.

use std::time::Duration;

use dashmap::DashMap;
use lanlink_core::{LanError, Result};
use tokio::sync::oneshot;
use tracing::debug;

pub struct PendingRequests<T> {
    pending: DashMap<String, oneshot::Sender<Result<T>>>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiver its response will arrive on
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<Result<T>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(request_id.to_string(), sender);
        receiver
    }

    /// Deliver a response; unknown or already settled ids return `false`
    pub fn resolve(&self, request_id: &str, value: T) -> bool {
        match self.pending.remove(request_id) {
            Some((_, sender)) => sender.send(Ok(value)).is_ok(),
            None => {
                debug!("No pending request {}", request_id);
                false
            }
        }
    }

    /// Wait for the response to a registered request, removing it on timeout
    pub async fn wait(
        &self,
        request_id: &str,
        receiver: oneshot::Receiver<Result<T>>,
        timeout: Duration,
        operation: &str,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LanError::Stopped),
            Err(_) => {
                self.pending.remove(request_id);
                Err(LanError::timeout(operation, timeout.as_millis() as u64))
            }
        }
    }

    /// Fail every outstanding request with the error produced by `reason`
    pub fn reject_all<F: Fn() -> LanError>(&self, reason: F) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut rejected = 0;
        for id in ids {
            if let Some((_, sender)) = self.pending.remove(&id) {
                let _ = sender.send(Err(reason()));
                rejected += 1;
            }
        }
        rejected
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
