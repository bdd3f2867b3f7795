//! # sippin - SIP voice-call client core
//!
//! The media and call-control half of a SIP user agent. SIP message handling
//! is left to the application, which plugs its dialog layer in through
//! [`client_core::SignalingLayer`].
//!
//! ## Overview
//!
//! - **Codec Core**: codec catalog, aliases and descriptor resolution
//! - **RTP Core**: RTP packets, UDP transport, sender, receiver and relay
//! - **Media Core**: SDP media blocks, offer/answer negotiation, media agent
//! - **Client Core**: user agent profile, call state machine, client events
//! - **Infra Common**: logging setup and config file loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sippin::prelude::*;
//!
//! # fn run(signaling: Arc<dyn SignalingLayer>) -> ClientResult<()> {
//! let profile = UserAgentProfile::new("alice").with_refuse_time(Some(30));
//! let agent = UserAgent::new(profile, signaling, Arc::new(CodecCatalog::standard()))?;
//! # let _ = agent;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

pub use sippin_client_core as client_core;
pub use sippin_codec_core as codec_core;
pub use sippin_infra_common as infra_common;
pub use sippin_media_core as media_core;
pub use sippin_rtp_core as rtp_core;

pub mod prelude {
    //! Common imports for sippin applications

    pub use crate::client_core::prelude::*;
    pub use crate::codec_core::{CodecCatalog, CodecDescriptor, CodecKind, CodecOverrides};
    pub use crate::infra_common::{setup_logging, LoggingConfig};
    pub use crate::media_core::{Direction, FlowSpec, MediaAgent, MediaAgentConfig, MediaEvent, SessionDescription};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
