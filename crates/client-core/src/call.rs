//! Call session tracking
//!
//! A [`CallSession`] is the user agent's view of one signaling dialog: who is
//! on the other end, the session descriptions exchanged so far and the media
//! kinds currently running. The dialog itself is owned by the SIP layer and
//! only referenced here through its [`DialogId`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sippin_media_core::SessionDescription;
use uuid::Uuid;

/// Identifier of a signaling dialog, assigned by the SIP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(pub Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of the user agent's call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallState {
    /// No call
    #[default]
    Idle,
    /// Incoming call waiting for user decision
    IncomingRinging,
    /// Outgoing call sent, no final response yet
    OutgoingProgress,
    /// Call is connected
    Active,
}

impl CallState {
    /// User-visible name
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::IncomingRinging => "incoming",
            CallState::OutgoingProgress => "outgoing",
            CallState::Active => "on-call",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Active)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a call (from the user agent's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// One dialog tracked by the user agent
#[derive(Debug, Clone)]
pub struct CallSession {
    pub dialog: DialogId,
    pub state: CallState,
    pub direction: CallDirection,
    /// Remote party (callee for outgoing calls, caller for incoming ones)
    pub peer: String,
    pub local_sdp: Option<SessionDescription>,
    pub remote_sdp: Option<SessionDescription>,
    /// Media kinds with a running flow
    pub media_kinds: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Provisional responses already reported
    pub(crate) progress_reported: bool,
    pub(crate) ringing_reported: bool,
}

impl CallSession {
    pub fn outgoing(dialog: DialogId, peer: impl Into<String>, offer: Option<SessionDescription>) -> Self {
        Self::new(dialog, CallState::OutgoingProgress, CallDirection::Outgoing, peer.into(), offer, None)
    }

    pub fn incoming(dialog: DialogId, peer: impl Into<String>, offer: Option<SessionDescription>) -> Self {
        Self::new(dialog, CallState::IncomingRinging, CallDirection::Incoming, peer.into(), None, offer)
    }

    fn new(
        dialog: DialogId,
        state: CallState,
        direction: CallDirection,
        peer: String,
        local_sdp: Option<SessionDescription>,
        remote_sdp: Option<SessionDescription>,
    ) -> Self {
        Self {
            dialog,
            state,
            direction,
            peer,
            local_sdp,
            remote_sdp,
            media_kinds: Vec::new(),
            created_at: Utc::now(),
            connected_at: None,
            progress_reported: false,
            ringing_reported: false,
        }
    }

    pub fn has_media(&self) -> bool {
        !self.media_kinds.is_empty()
    }

    /// Point the session at a new dialog (e.g. after a redirection)
    pub(crate) fn retarget(&mut self, dialog: DialogId, peer: impl Into<String>) {
        self.dialog = dialog;
        self.peer = peer.into();
        self.progress_reported = false;
        self.ringing_reported = false;
    }
}

/// Snapshot of the current call for callers outside the user agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub dialog: DialogId,
    pub state: CallState,
    pub direction: CallDirection,
    pub peer: String,
    pub media_kinds: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Dialog of a transfer in progress
    pub transfer_dialog: Option<DialogId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(CallState::Idle.as_str(), "idle");
        assert_eq!(CallState::IncomingRinging.to_string(), "incoming");
        assert_eq!(CallState::OutgoingProgress.to_string(), "outgoing");
        assert_eq!(CallState::Active.to_string(), "on-call");
        assert_eq!(CallState::default(), CallState::Idle);
    }

    #[test]
    fn test_retarget_resets_provisional_flags() {
        let mut session = CallSession::outgoing(DialogId::new(), "sip:bob@example.com", None);
        session.progress_reported = true;
        session.ringing_reported = true;
        let next = DialogId::new();
        session.retarget(next, "sip:carol@example.com");
        assert_eq!(session.dialog, next);
        assert_eq!(session.peer, "sip:carol@example.com");
        assert!(!session.progress_reported && !session.ringing_reported);
        assert_eq!(session.state, CallState::OutgoingProgress);
    }
}
