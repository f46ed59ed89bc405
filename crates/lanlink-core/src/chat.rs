//! Chat log with delivery tracking
//!
//! Entries are appended on send and receive. An outbound entry is flipped to
//! [`DeliveryStatus::Delivered`] when the peer acks it, or dropped if it never left.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::message::ChatMessagePayload;
use crate::types::{PeerId, SenderMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
}

/// What an entry represents; file entries carry the file name as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: String,
    pub peer_id: PeerId,
    pub direction: ChatDirection,
    pub kind: ChatKind,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub from: SenderMeta,
    pub status: DeliveryStatus,
}

impl ChatEntry {
    pub fn outgoing(peer_id: PeerId, payload: &ChatMessagePayload) -> Self {
        Self {
            id: payload.id.clone(),
            peer_id,
            direction: ChatDirection::Out,
            kind: ChatKind::Text,
            text: payload.text.clone(),
            sent_at: payload.sent_at,
            from: payload.from.clone(),
            status: DeliveryStatus::Sent,
        }
    }

    pub fn incoming(peer_id: PeerId, payload: &ChatMessagePayload) -> Self {
        Self {
            direction: ChatDirection::In,
            status: DeliveryStatus::Delivered,
            ..Self::outgoing(peer_id, payload)
        }
    }

    /// Entry for a file; outbound ones wait for FILE_ACK
    pub fn file(
        peer_id: PeerId,
        file_id: &str,
        name: &str,
        direction: ChatDirection,
        from: SenderMeta,
    ) -> Self {
        Self {
            id: file_id.to_string(),
            peer_id,
            direction,
            kind: ChatKind::File,
            text: name.to_string(),
            sent_at: Utc::now(),
            from,
            status: match direction {
                ChatDirection::Out => DeliveryStatus::Sent,
                ChatDirection::In => DeliveryStatus::Delivered,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    /// Flip the outbound entry with `id` to delivered; returns whether one matched
    pub fn mark_delivered(&mut self, id: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.direction == ChatDirection::Out && entry.id == id)
        {
            Some(entry) => {
                entry.status = DeliveryStatus::Delivered;
                true
            }
            None => false,
        }
    }

    /// Drop an outbound entry whose transmission failed
    pub fn discard(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.direction == ChatDirection::Out && entry.id == id));
        self.entries.len() != before
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Conversation with one peer, oldest first
    pub fn for_peer(&self, peer_id: &PeerId) -> Vec<ChatEntry> {
        self.entries
            .iter()
            .filter(|entry| &entry.peer_id == peer_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str) -> ChatMessagePayload {
        ChatMessagePayload {
            id: id.to_string(),
            text: "hello".to_string(),
            sent_at: Utc::now(),
            from: SenderMeta::new("desk", 4100),
        }
    }

    #[test]
    fn test_ack_flips_only_outbound() {
        let peer = PeerId::from("manual::10.0.0.2:4000");
        let mut log = ChatLog::new();
        log.record(ChatEntry::outgoing(peer.clone(), &payload("m1")));
        log.record(ChatEntry::incoming(peer.clone(), &payload("m2")));

        assert!(log.mark_delivered("m1"));
        assert!(!log.mark_delivered("m2"));
        assert!(!log.mark_delivered("missing"));
        assert_eq!(log.entries()[0].status, DeliveryStatus::Delivered);
        assert_eq!(log.for_peer(&peer).len(), 2);
    }

    #[test]
    fn test_file_entries_share_ack_path() {
        let peer = PeerId::from("laptop::4200");
        let mut log = ChatLog::new();
        log.record(ChatEntry::file(
            peer,
            "f1",
            "report.pdf",
            ChatDirection::Out,
            SenderMeta::new("desk", 4100),
        ));
        assert_eq!(log.entries()[0].status, DeliveryStatus::Sent);
        assert!(log.mark_delivered("f1"));
        assert_eq!(log.entries()[0].kind, ChatKind::File);
    }

    #[test]
    fn test_discard_removes_failed_outbound() {
        let peer = PeerId::from("laptop::4200");
        let mut log = ChatLog::new();
        log.record(ChatEntry::outgoing(peer.clone(), &payload("m1")));
        log.record(ChatEntry::incoming(peer, &payload("m1")));

        assert!(log.discard("m1"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].direction, ChatDirection::In);
        assert!(!log.discard("m1"));
    }
}
