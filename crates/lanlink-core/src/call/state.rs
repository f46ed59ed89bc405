//! Call State Machine
//!
//! `Idle -> Calling -> Connected` for the caller, `Idle -> Ringing -> Connected` for
//! the callee, and any non-idle state falls back to `Idle` when the call ends.
//! Transitions consume the current state and reject anything else.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;

// ----------------------------------------------------------------------------
// State Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    /// Offer sent, waiting for the answer
    Calling,
    /// Offer received, waiting for the local user
    Ringing,
    Connected,
}

/// Inputs that move a call between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTrigger {
    /// Local user starts a call
    Initiate,
    /// A remote offer arrives
    RemoteOffer,
    /// The remote answer arrives
    RemoteAnswer,
    /// Local user accepts a ringing call
    Accept,
    /// Media connectivity reports `connected`
    ConnectivityUp,
    /// Hang-up, remote end, failure or timeout
    End,
}

// ----------------------------------------------------------------------------
// Transitions
// ----------------------------------------------------------------------------

impl CallState {
    pub fn state_name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    /// Process a trigger and return the next state (consumes self)
    pub fn transition(self, trigger: CallTrigger) -> Result<CallState, StateTransitionError> {
        match (self, trigger) {
            (CallState::Idle, CallTrigger::Initiate) => Ok(CallState::Calling),
            (CallState::Idle, CallTrigger::RemoteOffer) => Ok(CallState::Ringing),
            (CallState::Calling, CallTrigger::RemoteAnswer) => Ok(CallState::Connected),
            (CallState::Calling, CallTrigger::ConnectivityUp) => Ok(CallState::Connected),
            (CallState::Connected, CallTrigger::ConnectivityUp) => Ok(CallState::Connected),
            (CallState::Ringing, CallTrigger::Accept) => Ok(CallState::Connected),
            (state, CallTrigger::End) if !state.is_idle() => Ok(CallState::Idle),
            (state, trigger) => Err(StateTransitionError {
                from: state.state_name().to_string(),
                trigger: format!("{:?}", trigger),
            }),
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}
