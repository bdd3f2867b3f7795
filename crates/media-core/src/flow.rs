//! Flow specifications handed from the negotiator to the media agent.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use sippin_codec_core::CodecDescriptor;

use crate::sdp::MediaDirection;

/// Which way media runs on a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    SendOnly,
    RecvOnly,
    #[default]
    FullDuplex,
}

impl Direction {
    /// Direction requested by local profile flags; `recv_only` wins
    pub fn from_flags(recv_only: bool, send_only: bool) -> Self {
        if recv_only {
            Direction::RecvOnly
        } else if send_only {
            Direction::SendOnly
        } else {
            Direction::FullDuplex
        }
    }

    pub fn sends(self) -> bool {
        matches!(self, Direction::SendOnly | Direction::FullDuplex)
    }

    pub fn receives(self) -> bool {
        matches!(self, Direction::RecvOnly | Direction::FullDuplex)
    }

    /// Narrow this direction by what the remote side announced.
    ///
    /// Returns `None` when nothing is left to run.
    pub fn restrict(self, remote: Option<MediaDirection>) -> Option<Self> {
        let (remote_sends, remote_receives) = match remote {
            None | Some(MediaDirection::SendRecv) => (true, true),
            Some(MediaDirection::SendOnly) => (true, false),
            Some(MediaDirection::RecvOnly) => (false, true),
            Some(MediaDirection::Inactive) => (false, false),
        };
        match (self.sends() && remote_receives, self.receives() && remote_sends) {
            (true, true) => Some(Direction::FullDuplex),
            (true, false) => Some(Direction::SendOnly),
            (false, true) => Some(Direction::RecvOnly),
            (false, false) => None,
        }
    }

    /// The SDP attribute announcing this direction
    pub fn as_sdp(self) -> MediaDirection {
        match self {
            Direction::SendOnly => MediaDirection::SendOnly,
            Direction::RecvOnly => MediaDirection::RecvOnly,
            Direction::FullDuplex => MediaDirection::SendRecv,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self {
            Direction::SendOnly => "=-->",
            Direction::RecvOnly => "<--=",
            Direction::FullDuplex => "<-->",
        };
        f.write_str(arrow)
    }
}

/// One negotiated media flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSpec {
    /// Media kind, lower case (e.g. "audio")
    pub kind: String,
    pub codec: CodecDescriptor,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub direction: Direction,
}

impl FlowSpec {
    pub fn remote_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr, self.remote_port)
    }
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{} [{}]",
            self.kind,
            self.local_port,
            self.direction,
            self.remote_socket_addr(),
            self.codec
        )
    }
}
