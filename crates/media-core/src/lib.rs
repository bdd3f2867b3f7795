//! Media Core library for sippin
//!
//! Everything between a call's SDP bodies and its RTP streams:
//!
//! - `sdp`: session description model, parser and writer
//! - `media_desc`: media blocks resolved against the codec catalog
//! - `negotiator`: offer/answer codec selection
//! - `flow`: negotiated flows and their direction
//! - `agent`: runs one RTP (or loopback relay) flow per media kind
//! - `tone`: test tone source for outgoing audio

pub mod agent;
pub mod error;
pub mod flow;
pub mod media_desc;
pub mod negotiator;
pub mod sdp;
pub mod tone;

pub use agent::{AudioDeviceFactory, MediaAgent, MediaAgentConfig, MediaEvent, SilentDeviceFactory};
pub use error::{Error, Result};
pub use flow::{Direction, FlowSpec};
pub use media_desc::{MediaDescriptor, DEFAULT_TRANSPORT};
pub use negotiator::Negotiator;
pub use sdp::{MediaDirection, RtpMap, SdpMedia, SessionDescription};
pub use tone::ToneSource;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Direction, Error, FlowSpec, MediaAgent, MediaAgentConfig, MediaDescriptor, MediaEvent,
        Negotiator, Result, SessionDescription,
    };
}
