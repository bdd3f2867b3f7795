//! # Codec-Core: audio codec catalog
//!
//! The catalog maps free-form codec names (as found in profiles and SDP
//! bodies) to the RTP parameters needed to packetize that codec: payload
//! type, frame size, frame rate and packet rate.
//!
//! ## Usage
//!
//! ```rust
//! use sippin_codec_core::{CodecCatalog, CodecKind, CodecOverrides};
//!
//! let catalog = CodecCatalog::standard();
//! let pcmu = catalog.resolve("pcmu", &CodecOverrides::none().with_packet_size(160));
//! assert_eq!(pcmu.kind, CodecKind::Ulaw);
//! assert_eq!(pcmu.packet_rate, 50);
//! ```

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

#[allow(missing_docs)]
pub mod catalog;
#[allow(missing_docs)]
pub mod error;
pub mod g711;
pub mod types;

pub use catalog::{CodecCatalog, CodecEntry, FrameRateRule, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE};
pub use error::{CodecError, Result};
pub use types::{packet_rate, CodecDescriptor, CodecKind, CodecOverrides};

/// Version information for the codec library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
