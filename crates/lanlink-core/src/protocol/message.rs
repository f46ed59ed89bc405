//! LanLink message envelope
//!
//! Every message is one JSON object carried in a single WebSocket text frame and
//! discriminated by its `type` field. Decoding is fail-closed: a frame must parse
//! into a known variant and pass structural validation, or it is rejected with
//! [`LanError::InvalidPayload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LanError, Result};
use crate::protocol::handshake::HelloPayload;
use crate::types::SenderMeta;

// ----------------------------------------------------------------------------
// Payload Types
// ----------------------------------------------------------------------------

/// Snapshot of today's task counts, answered to REQUEST_TODAY_SUMMARY
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    pub total_tasks: u32,
    pub done_count: u32,
    pub in_progress_count: u32,
    pub blocked_count: u32,
    pub top3_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub from: SenderMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAckPayload {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

/// Metadata announced in FILE_OFFER
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOfferPayload {
    pub file: FileMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkPayload {
    pub file_id: String,
    pub index: u64,
    pub total: u64,
    /// Base64 of the raw chunk bytes
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCompletePayload {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAckPayload {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

/// Payload shared by CALL_OFFER and CALL_ANSWER
///
/// `sdp` is kept opaque here; [`crate::call::SessionDescription`] normalizes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSdpPayload {
    pub sdp: Value,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub candidate: Value,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndPayload {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SenderMeta>,
}

// ----------------------------------------------------------------------------
// Message Envelope
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LanMessage {
    Hello {
        payload: HelloPayload,
    },
    HelloOk {
        payload: HelloPayload,
    },
    Ping,
    Pong,
    RequestTodaySummary {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    TodaySummary {
        #[serde(rename = "requestId")]
        request_id: String,
        payload: TodaySummary,
    },
    ChatMessage {
        payload: ChatMessagePayload,
    },
    ChatAck {
        payload: ChatAckPayload,
    },
    FileOffer {
        payload: FileOfferPayload,
    },
    FileChunk {
        payload: FileChunkPayload,
    },
    FileComplete {
        payload: FileCompletePayload,
    },
    FileAck {
        payload: FileAckPayload,
    },
    CallOffer {
        payload: CallSdpPayload,
    },
    CallAnswer {
        payload: CallSdpPayload,
    },
    IceCandidate {
        payload: IceCandidatePayload,
    },
    CallEnd {
        payload: CallEndPayload,
    },
}

impl LanMessage {
    /// Decode and structurally validate one text frame
    pub fn decode(text: &str) -> Result<Self> {
        let message: LanMessage = serde_json::from_str(text)
            .map_err(|e| LanError::invalid_payload(format!("undecodable frame: {}", e)))?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize into the JSON text carried by one frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this message's `type`
    pub fn message_type(&self) -> &'static str {
        match self {
            LanMessage::Hello { .. } => "HELLO",
            LanMessage::HelloOk { .. } => "HELLO_OK",
            LanMessage::Ping => "PING",
            LanMessage::Pong => "PONG",
            LanMessage::RequestTodaySummary { .. } => "REQUEST_TODAY_SUMMARY",
            LanMessage::TodaySummary { .. } => "TODAY_SUMMARY",
            LanMessage::ChatMessage { .. } => "CHAT_MESSAGE",
            LanMessage::ChatAck { .. } => "CHAT_ACK",
            LanMessage::FileOffer { .. } => "FILE_OFFER",
            LanMessage::FileChunk { .. } => "FILE_CHUNK",
            LanMessage::FileComplete { .. } => "FILE_COMPLETE",
            LanMessage::FileAck { .. } => "FILE_ACK",
            LanMessage::CallOffer { .. } => "CALL_OFFER",
            LanMessage::CallAnswer { .. } => "CALL_ANSWER",
            LanMessage::IceCandidate { .. } => "ICE_CANDIDATE",
            LanMessage::CallEnd { .. } => "CALL_END",
        }
    }

    /// Sender metadata carried in the payload, if any
    pub fn sender(&self) -> Option<&SenderMeta> {
        match self {
            LanMessage::ChatMessage { payload } => Some(&payload.from),
            LanMessage::ChatAck { payload } => payload.from.as_ref(),
            LanMessage::FileOffer { payload } => payload.from.as_ref(),
            LanMessage::FileChunk { payload } => payload.from.as_ref(),
            LanMessage::FileComplete { payload } => payload.from.as_ref(),
            LanMessage::FileAck { payload } => payload.from.as_ref(),
            LanMessage::CallOffer { payload } | LanMessage::CallAnswer { payload } => {
                payload.from.as_ref()
            }
            LanMessage::IceCandidate { payload } => payload.from.as_ref(),
            LanMessage::CallEnd { payload } => payload.from.as_ref(),
            _ => None,
        }
    }

    /// Structural checks beyond what serde enforces
    pub fn validate(&self) -> Result<()> {
        match self {
            LanMessage::Hello { payload } | LanMessage::HelloOk { payload } => {
                require_non_empty("app", &payload.app)?;
                require_non_empty("v", &payload.v)
            }
            LanMessage::RequestTodaySummary { request_id }
            | LanMessage::TodaySummary { request_id, .. } => {
                require_non_empty("requestId", request_id)
            }
            LanMessage::ChatMessage { payload } => {
                require_non_empty("id", &payload.id)?;
                require_non_empty("text", &payload.text)
            }
            LanMessage::ChatAck { payload } => require_non_empty("messageId", &payload.message_id),
            LanMessage::FileOffer { payload } => {
                require_non_empty("file.id", &payload.file.id)?;
                require_non_empty("file.name", &payload.file.name)
            }
            LanMessage::FileChunk { payload } => require_non_empty("fileId", &payload.file_id),
            LanMessage::FileComplete { payload } => require_non_empty("fileId", &payload.file_id),
            LanMessage::FileAck { payload } => require_non_empty("fileId", &payload.file_id),
            LanMessage::Ping
            | LanMessage::Pong
            | LanMessage::CallOffer { .. }
            | LanMessage::CallAnswer { .. }
            | LanMessage::IceCandidate { .. }
            | LanMessage::CallEnd { .. } => Ok(()),
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LanError::invalid_payload(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Signaling
// ----------------------------------------------------------------------------

/// A call signaling message, relayed between the transport and the call manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Signal {
    Offer { sdp: Value, call_id: String },
    Answer { sdp: Value, call_id: String },
    IceCandidate { candidate: Value, call_id: String },
    End { call_id: String, reason: Option<String> },
}

impl Signal {
    pub fn call_id(&self) -> &str {
        match self {
            Signal::Offer { call_id, .. }
            | Signal::Answer { call_id, .. }
            | Signal::IceCandidate { call_id, .. }
            | Signal::End { call_id, .. } => call_id,
        }
    }

    /// Extract the signal carried by a signaling message
    pub fn from_message(message: &LanMessage) -> Option<Self> {
        match message {
            LanMessage::CallOffer { payload } => Some(Signal::Offer {
                sdp: payload.sdp.clone(),
                call_id: payload.call_id.clone(),
            }),
            LanMessage::CallAnswer { payload } => Some(Signal::Answer {
                sdp: payload.sdp.clone(),
                call_id: payload.call_id.clone(),
            }),
            LanMessage::IceCandidate { payload } => Some(Signal::IceCandidate {
                candidate: payload.candidate.clone(),
                call_id: payload.call_id.clone(),
            }),
            LanMessage::CallEnd { payload } => Some(Signal::End {
                call_id: payload.call_id.clone(),
                reason: payload.reason.clone(),
            }),
            _ => None,
        }
    }

    /// Wrap into a wire message stamped with the sender's identity
    pub fn into_message(self, from: Option<SenderMeta>) -> LanMessage {
        match self {
            Signal::Offer { sdp, call_id } => LanMessage::CallOffer {
                payload: CallSdpPayload { sdp, call_id, from },
            },
            Signal::Answer { sdp, call_id } => LanMessage::CallAnswer {
                payload: CallSdpPayload { sdp, call_id, from },
            },
            Signal::IceCandidate { candidate, call_id } => LanMessage::IceCandidate {
                payload: IceCandidatePayload {
                    candidate,
                    call_id,
                    from,
                },
            },
            Signal::End { call_id, reason } => LanMessage::CallEnd {
                payload: CallEndPayload {
                    call_id,
                    reason,
                    from,
                },
            },
        }
    }
}
