//! Boundary to the SIP dialog layer
//!
//! The user agent never speaks SIP itself. It drives dialogs through a
//! [`SignalingLayer`] and learns about them through [`SignalingEvent`]s,
//! one variant per dialog lifecycle callback.

use std::time::Duration;

use async_trait::async_trait;

use crate::call::DialogId;
use crate::error::ClientResult;

/// Dialog operations offered by the SIP layer
#[async_trait]
pub trait SignalingLayer: Send + Sync {
    /// Send an INVITE; `offer` is the SDP body, if any
    async fn call(&self, target: &str, offer: Option<&str>) -> ClientResult<DialogId>;

    /// Send 180 Ringing for an incoming call
    async fn ring(&self, dialog: DialogId) -> ClientResult<()>;

    /// Send 200 OK with the answer (or the re-invite response)
    async fn accept(&self, dialog: DialogId, answer: &str) -> ClientResult<()>;

    /// Refuse an incoming call
    async fn refuse(&self, dialog: DialogId) -> ClientResult<()>;

    /// Answer an incoming call with a redirection to `target`
    async fn redirect(&self, dialog: DialogId, target: &str) -> ClientResult<()>;

    /// ACK a 2xx carrying an offer, with our answer
    async fn ack_with_answer(&self, dialog: DialogId, answer: &str) -> ClientResult<()>;

    /// Close the dialog (BYE or CANCEL, as the dialog state requires)
    async fn hangup(&self, dialog: DialogId) -> ClientResult<()>;

    /// Send a re-INVITE with a new body
    async fn modify(&self, dialog: DialogId, body: &str) -> ClientResult<()>;

    /// Ask the remote party to call `target` (REFER)
    async fn transfer(&self, dialog: DialogId, target: &str) -> ClientResult<()>;

    /// Accept a REFER received on the dialog
    async fn accept_transfer(&self, dialog: DialogId) -> ClientResult<()>;

    /// Report transfer progress on the dialog that requested it (NOTIFY)
    async fn notify(&self, dialog: DialogId, code: u16, reason: &str) -> ClientResult<()>;

    /// Bind the contact address at the registrar for `expires`.
    ///
    /// Layers without a registrar keep the default, which does nothing.
    async fn register(&self, _expires: Duration) -> ClientResult<()> {
        Ok(())
    }

    /// Remove the contact binding from the registrar
    async fn unregister(&self) -> ClientResult<()> {
        Ok(())
    }

    /// Send one keep-alive datagram towards the outbound proxy
    async fn keep_alive(&self) -> ClientResult<()> {
        Ok(())
    }
}

/// Dialog lifecycle events reported by the SIP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// New INVITE creating a dialog
    IncomingCall {
        dialog: DialogId,
        caller: String,
        callee: String,
        sdp: Option<String>,
    },
    /// 183 Session Progress
    Progress { dialog: DialogId },
    /// 180 Ringing
    Ringing { dialog: DialogId },
    /// 2xx to our INVITE (or our 2xx acknowledged by the SIP layer)
    Accepted { dialog: DialogId, sdp: Option<String> },
    /// ACK received
    Confirmed { dialog: DialogId, sdp: Option<String> },
    /// re-INVITE received
    ReInvite { dialog: DialogId, sdp: Option<String> },
    ReInviteAccepted { dialog: DialogId, sdp: Option<String> },
    ReInviteRefused { dialog: DialogId, reason: String },
    /// 4xx-6xx to our INVITE
    Refused { dialog: DialogId, code: u16, reason: String },
    /// 3xx to our INVITE
    Redirected {
        dialog: DialogId,
        reason: String,
        contacts: Vec<String>,
    },
    /// CANCEL received
    Cancelled { dialog: DialogId },
    /// BYE received
    Bye { dialog: DialogId },
    /// Response to our BYE
    Closed { dialog: DialogId },
    /// INVITE transaction expired
    Timeout { dialog: DialogId },
    /// REFER received
    TransferRequested {
        dialog: DialogId,
        refer_to: String,
        referred_by: Option<String>,
    },
    /// 2xx to our REFER
    TransferAccepted { dialog: DialogId },
    /// Failure response to our REFER
    TransferRefused { dialog: DialogId, reason: String },
    /// NOTIFY reporting the transferred call succeeded
    TransferSucceeded { dialog: DialogId },
    /// NOTIFY reporting the transferred call failed
    TransferFailed { dialog: DialogId, reason: String },
}

impl SignalingEvent {
    /// Dialog the event belongs to
    pub fn dialog(&self) -> DialogId {
        match self {
            SignalingEvent::IncomingCall { dialog, .. }
            | SignalingEvent::Progress { dialog }
            | SignalingEvent::Ringing { dialog }
            | SignalingEvent::Accepted { dialog, .. }
            | SignalingEvent::Confirmed { dialog, .. }
            | SignalingEvent::ReInvite { dialog, .. }
            | SignalingEvent::ReInviteAccepted { dialog, .. }
            | SignalingEvent::ReInviteRefused { dialog, .. }
            | SignalingEvent::Refused { dialog, .. }
            | SignalingEvent::Redirected { dialog, .. }
            | SignalingEvent::Cancelled { dialog }
            | SignalingEvent::Bye { dialog }
            | SignalingEvent::Closed { dialog }
            | SignalingEvent::Timeout { dialog }
            | SignalingEvent::TransferRequested { dialog, .. }
            | SignalingEvent::TransferAccepted { dialog }
            | SignalingEvent::TransferRefused { dialog, .. }
            | SignalingEvent::TransferSucceeded { dialog }
            | SignalingEvent::TransferFailed { dialog, .. } => *dialog,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            SignalingEvent::IncomingCall { .. } => "incoming-call",
            SignalingEvent::Progress { .. } => "progress",
            SignalingEvent::Ringing { .. } => "ringing",
            SignalingEvent::Accepted { .. } => "accepted",
            SignalingEvent::Confirmed { .. } => "confirmed",
            SignalingEvent::ReInvite { .. } => "re-invite",
            SignalingEvent::ReInviteAccepted { .. } => "re-invite-accepted",
            SignalingEvent::ReInviteRefused { .. } => "re-invite-refused",
            SignalingEvent::Refused { .. } => "refused",
            SignalingEvent::Redirected { .. } => "redirected",
            SignalingEvent::Cancelled { .. } => "cancelled",
            SignalingEvent::Bye { .. } => "bye",
            SignalingEvent::Closed { .. } => "closed",
            SignalingEvent::Timeout { .. } => "timeout",
            SignalingEvent::TransferRequested { .. } => "transfer-requested",
            SignalingEvent::TransferAccepted { .. } => "transfer-accepted",
            SignalingEvent::TransferRefused { .. } => "transfer-refused",
            SignalingEvent::TransferSucceeded { .. } => "transfer-succeeded",
            SignalingEvent::TransferFailed { .. } => "transfer-failed",
        }
    }
}
