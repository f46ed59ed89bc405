//! Peer Directory
//!
//! Holds the two peer sets a node knows about: peers announced through discovery
//! and peers configured manually or learned from inbound traffic. Listings merge
//! both sets so that no address appears twice, with discovered entries winning.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{LanError, Result};
use crate::types::{Peer, PeerId, PeerOrigin};

// ----------------------------------------------------------------------------
// Address Normalization
// ----------------------------------------------------------------------------

/// Canonical form of a host used for every address comparison
///
/// Strips the IPv4-mapped `::ffff:` prefix and maps the IPv6 loopback to `127.0.0.1`.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if let Some(v4) = unbracketed.strip_prefix("::ffff:") {
        return v4.to_string();
    }
    if unbracketed == "::1" {
        return "127.0.0.1".to_string();
    }
    unbracketed.to_string()
}

/// Result of reconciling an inbound sender with the directory
#[derive(Debug, Clone, PartialEq)]
pub struct ContactUpsert {
    pub peer: Peer,
    /// A new manual entry was created, so the listing changed
    pub created: bool,
}

// ----------------------------------------------------------------------------
// Peer Directory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PeerDirectory {
    discovered: HashMap<PeerId, Peer>,
    manual: HashMap<PeerId, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged listing: manual entries shadowed by a discovered address are dropped
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.discovered.values().cloned().collect();
        peers.extend(
            self.manual
                .values()
                .filter(|manual| {
                    !self
                        .discovered
                        .values()
                        .any(|known| same_address(known, &manual.host, manual.port))
                })
                .cloned(),
        );
        peers.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        peers
    }

    /// Look up a peer, manual entries first
    pub fn get(&self, peer_id: &PeerId) -> Result<Peer> {
        self.manual
            .get(peer_id)
            .or_else(|| self.discovered.get(peer_id))
            .cloned()
            .ok_or_else(|| LanError::peer_not_found(peer_id.as_str()))
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    // ------------------------------------------------------------------------
    // Manual Peers
    // ------------------------------------------------------------------------

    /// Register a manually configured peer; the name defaults to the host
    pub fn add_manual(&mut self, host: &str, port: u32, name: Option<&str>) -> Result<Peer> {
        let host = normalize_address(host);
        if host.is_empty() {
            return Err(LanError::invalid_input("Host is required"));
        }
        if port == 0 || port > u16::MAX as u32 {
            return Err(LanError::invalid_input(format!("Invalid port: {}", port)));
        }
        let port = port as u16;
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&host)
            .to_string();

        let peer = Peer {
            id: PeerId::manual(&host, port),
            name,
            host,
            port,
            last_seen: Utc::now(),
            origin: PeerOrigin::Manual,
        };
        debug!("Added manual peer {} at {}", peer.id, peer.socket_target());
        self.manual.insert(peer.id.clone(), peer.clone());
        Ok(peer)
    }

    /// Remove a manual entry; absent ids are ignored
    pub fn remove_manual(&mut self, peer_id: &PeerId) -> bool {
        self.manual.remove(peer_id).is_some()
    }

    /// Reconcile the sender of an inbound message with the directory
    ///
    /// Returns `None` when the host normalizes to nothing or the port is zero.
    pub fn upsert_from_contact(
        &mut self,
        name: Option<&str>,
        host: &str,
        port: u16,
    ) -> Option<ContactUpsert> {
        let host = normalize_address(host);
        if host.is_empty() || port == 0 {
            return None;
        }
        let name = name.map(str::trim).filter(|name| !name.is_empty());
        let now = Utc::now();

        if let Some(existing) = self
            .discovered
            .values_mut()
            .find(|peer| same_address(peer, &host, port))
        {
            existing.last_seen = now;
            return Some(ContactUpsert {
                peer: existing.clone(),
                created: false,
            });
        }

        if let Some(existing) = self
            .manual
            .values_mut()
            .find(|peer| same_address(peer, &host, port))
        {
            existing.last_seen = now;
            if let Some(name) = name {
                existing.name = name.to_string();
            }
            return Some(ContactUpsert {
                peer: existing.clone(),
                created: false,
            });
        }

        let peer = Peer {
            id: PeerId::manual(&host, port),
            name: name.map(str::to_string).unwrap_or_else(|| host.clone()),
            host,
            port,
            last_seen: now,
            origin: PeerOrigin::Manual,
        };
        debug!("Learned peer {} from inbound traffic", peer.id);
        self.manual.insert(peer.id.clone(), peer.clone());
        Some(ContactUpsert {
            peer,
            created: true,
        })
    }

    /// Address-only lookup for signaling messages that carry no sender
    pub fn find_by_host(&self, host: &str) -> Option<Peer> {
        let host = normalize_address(host);
        self.manual
            .values()
            .chain(self.discovered.values())
            .find(|peer| normalize_address(&peer.host) == host)
            .cloned()
    }

    // ------------------------------------------------------------------------
    // Discovery Hooks
    // ------------------------------------------------------------------------

    /// Record an announcement; returns whether the listing changed
    pub fn discovered_up(&mut self, name: &str, host: &str, port: u16) -> bool {
        let host = normalize_address(host);
        let id = PeerId::discovered(name, port);
        let now = Utc::now();
        match self.discovered.get_mut(&id) {
            Some(existing) => {
                existing.last_seen = now;
                if existing.host != host {
                    existing.host = host;
                    return true;
                }
                false
            }
            None => {
                debug!("Discovered peer {} at {}:{}", id, host, port);
                self.discovered.insert(
                    id.clone(),
                    Peer {
                        id,
                        name: name.to_string(),
                        host,
                        port,
                        last_seen: now,
                        origin: PeerOrigin::Discovered,
                    },
                );
                true
            }
        }
    }

    /// Remove a discovered peer that said goodbye
    pub fn discovered_down(&mut self, name: &str, port: u16) -> bool {
        self.discovered
            .remove(&PeerId::discovered(name, port))
            .is_some()
    }

    /// Drop discovered entries not seen within `ttl` of `now`
    pub fn expire_discovered(&mut self, ttl: Duration, now: DateTime<Utc>) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .discovered
            .values()
            .filter(|peer| {
                (now - peer.last_seen)
                    .to_std()
                    .map(|age| age > ttl)
                    .unwrap_or(false)
            })
            .map(|peer| peer.id.clone())
            .collect();
        for id in &stale {
            debug!("Discovered peer {} expired", id);
            self.discovered.remove(id);
        }
        stale
    }

    /// Forget every discovered entry; returns whether any existed
    pub fn clear_discovered(&mut self) -> bool {
        let had_entries = !self.discovered.is_empty();
        self.discovered.clear();
        had_entries
    }
}

fn same_address(peer: &Peer, normalized_host: &str, port: u16) -> bool {
    peer.port == port && normalize_address(&peer.host) == normalized_host
}
