//! Event handling for client-core operations
//!
//! The user agent publishes [`ClientEvent`]s on a broadcast channel; UIs
//! subscribe with [`crate::UserAgent::subscribe`].

use std::net::SocketAddr;
use std::time::Duration;

use sippin_media_core::MediaDescriptor;

use crate::call::{CallState, DialogId};

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Low priority events (media and routine status)
    Low,
    /// Normal priority events (state changes)
    Normal,
    /// High priority events (incoming calls, failures)
    High,
}

/// Events surfaced to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Incoming call ringing
    IncomingCall {
        dialog: DialogId,
        caller: String,
        callee: String,
        /// Media offered by the caller
        media: Vec<MediaDescriptor>,
    },
    /// Call state changed
    CallStateChanged {
        dialog: DialogId,
        previous: CallState,
        current: CallState,
    },
    CallProgress { dialog: DialogId },
    CallRinging { dialog: DialogId },
    CallAccepted { dialog: DialogId },
    CallFailed { dialog: Option<DialogId>, reason: String },
    CallCancelled { dialog: DialogId },
    CallClosed { dialog: DialogId },
    /// The call was handed over to another dialog
    CallTransferred { dialog: DialogId },
    TransferFailed { dialog: DialogId, reason: String },
    /// A re-INVITE we sent was refused
    ModifyFailed { dialog: DialogId, reason: String },
    MediaStarted {
        dialog: DialogId,
        kind: String,
        /// Payload type of the negotiated format
        format: String,
    },
    MediaStopped { dialog: DialogId, kind: String },
    /// The remote party's media moved (symmetric RTP or relay)
    RemoteMediaAddressChanged { kind: String, addr: SocketAddr },
    /// Contact bound at the registrar
    Registered { expires: Duration },
    RegistrationFailed { reason: String },
    Unregistered,
}

impl ClientEvent {
    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::IncomingCall { .. }
            | ClientEvent::CallFailed { .. }
            | ClientEvent::TransferFailed { .. }
            | ClientEvent::ModifyFailed { .. }
            | ClientEvent::RegistrationFailed { .. } => EventPriority::High,
            ClientEvent::MediaStarted { .. }
            | ClientEvent::MediaStopped { .. }
            | ClientEvent::RemoteMediaAddressChanged { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Get the dialog associated with this event (if any)
    pub fn dialog(&self) -> Option<DialogId> {
        match self {
            ClientEvent::IncomingCall { dialog, .. }
            | ClientEvent::CallStateChanged { dialog, .. }
            | ClientEvent::CallProgress { dialog }
            | ClientEvent::CallRinging { dialog }
            | ClientEvent::CallAccepted { dialog }
            | ClientEvent::CallCancelled { dialog }
            | ClientEvent::CallClosed { dialog }
            | ClientEvent::CallTransferred { dialog }
            | ClientEvent::TransferFailed { dialog, .. }
            | ClientEvent::ModifyFailed { dialog, .. }
            | ClientEvent::MediaStarted { dialog, .. }
            | ClientEvent::MediaStopped { dialog, .. } => Some(*dialog),
            ClientEvent::CallFailed { dialog, .. } => *dialog,
            ClientEvent::RemoteMediaAddressChanged { .. }
            | ClientEvent::Registered { .. }
            | ClientEvent::RegistrationFailed { .. }
            | ClientEvent::Unregistered => None,
        }
    }
}
