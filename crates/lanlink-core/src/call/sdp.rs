//! SDP and ICE payload normalization
//!
//! Peers send session descriptions either as a bare SDP string or as an object
//! `{type?, sdp}`, and candidates as `{candidate, sdpMid?, sdpMLineIndex?}`.
//! Anything that does not fit is rejected before it reaches the negotiation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{LanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(SdpType::Offer),
            "answer" => Some(SdpType::Answer),
            "pranswer" => Some(SdpType::Pranswer),
            "rollback" => Some(SdpType::Rollback),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Description
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new<S: Into<String>>(sdp_type: SdpType, sdp: S) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    /// Accept a bare SDP string or `{type?, sdp}`; a missing type becomes `fallback`
    pub fn normalize(value: &Value, fallback: SdpType) -> Result<Self> {
        match value {
            Value::String(sdp) if !sdp.trim().is_empty() => Ok(Self::new(fallback, sdp.clone())),
            Value::Object(fields) => {
                let sdp = fields
                    .get("sdp")
                    .and_then(Value::as_str)
                    .filter(|sdp| !sdp.trim().is_empty())
                    .ok_or_else(|| LanError::invalid_payload("session description without sdp"))?;
                let sdp_type = fields
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(SdpType::parse)
                    .unwrap_or(fallback);
                Ok(Self::new(sdp_type, sdp))
            }
            _ => Err(LanError::invalid_payload(
                "session description must be a string or an object",
            )),
        }
    }

    /// Wire form relayed inside CALL_OFFER / CALL_ANSWER
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "type": self.sdp_type, "sdp": self.sdp })
    }
}

// ----------------------------------------------------------------------------
// ICE Candidate
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Validate a received candidate
    ///
    /// The candidate line must be non-blank and at least one of a non-blank
    /// `sdpMid` or a numeric `sdpMLineIndex` must be present.
    pub fn normalize(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| LanError::invalid_payload("ICE candidate must be an object"))?;
        let candidate = fields
            .get("candidate")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| LanError::invalid_payload("ICE candidate line is empty"))?;
        let sdp_mid = fields
            .get("sdpMid")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|mid| !mid.is_empty())
            .map(str::to_string);
        let sdp_m_line_index = fields
            .get("sdpMLineIndex")
            .and_then(Value::as_u64)
            .and_then(|index| u16::try_from(index).ok());
        if sdp_mid.is_none() && sdp_m_line_index.is_none() {
            return Err(LanError::invalid_payload(
                "ICE candidate needs sdpMid or sdpMLineIndex",
            ));
        }
        let username_fragment = fields
            .get("usernameFragment")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            candidate: candidate.to_string(),
            sdp_mid,
            sdp_m_line_index,
            username_fragment,
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
