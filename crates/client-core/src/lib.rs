//! Client-core: SIP call coordination layer
//!
//! This crate sits between a SIP dialog layer and the media stack:
//!
//! ```text
//! application -> client-core -> {SignalingLayer, media-core -> rtp-core, codec-core}
//! ```
//!
//! Client-core focuses on:
//! - The user agent profile (ports, codecs, timers, media flags)
//! - The call state machine driven by user actions and dialog events
//! - Starting and stopping media flows from the SDP offer/answer
//! - Client events for UI integration
//!
//! SIP message handling itself is behind the [`SignalingLayer`] trait.

pub mod agent;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod signaling;

pub use agent::{UserAgent, EVENT_CHANNEL_CAPACITY};
pub use call::{CallDirection, CallInfo, CallSession, CallState, DialogId};
pub use config::UserAgentProfile;
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, EventPriority};
pub use signaling::{SignalingEvent, SignalingLayer};

/// Client-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        CallInfo, CallState, ClientError, ClientEvent, ClientResult, DialogId, SignalingEvent,
        SignalingLayer, UserAgent, UserAgentProfile,
    };
}
