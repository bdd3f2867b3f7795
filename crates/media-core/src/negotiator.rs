//! Offer/answer negotiation
//!
//! Turns the local capability blocks and the remote party's blocks into the
//! concrete flows the media agent runs, and into the media blocks of an SDP
//! answer. Remote order decides: for each remote block the first remote
//! codec also present locally is chosen.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use sippin_codec_core::{CodecCatalog, CodecDescriptor};
use tracing::{debug, info, warn};

use crate::flow::{Direction, FlowSpec};
use crate::media_desc::MediaDescriptor;
use crate::sdp::SessionDescription;

/// Offer/answer engine bound to a codec catalog
#[derive(Debug, Clone)]
pub struct Negotiator {
    catalog: Arc<CodecCatalog>,
}

impl Negotiator {
    pub fn new(catalog: Arc<CodecCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<CodecCatalog> {
        &self.catalog
    }

    /// Flows for every media kind both sides can run.
    ///
    /// Only the first remote block of each kind is considered. A kind missing
    /// on either side, a zero port, or no common codec yields no flow.
    pub fn negotiate(
        local: &[MediaDescriptor],
        remote: &[MediaDescriptor],
        remote_addr: IpAddr,
        direction: Direction,
    ) -> Vec<FlowSpec> {
        let mut seen = HashSet::new();
        remote
            .iter()
            .filter(|r| seen.insert(r.kind.to_ascii_lowercase()))
            .filter_map(|r| Self::select(local, r))
            .map(|(local_port, remote_port, kind, codec)| FlowSpec {
                kind,
                codec,
                local_port,
                remote_addr,
                remote_port,
                direction,
            })
            .collect()
    }

    /// Choose the local port and codec for one remote block
    fn select(local: &[MediaDescriptor], remote: &MediaDescriptor) -> Option<(u16, u16, String, CodecDescriptor)> {
        let Some(local_block) = local.iter().find(|l| l.same_kind(remote)) else {
            debug!("No local {} block, skipping", remote.kind);
            return None;
        };
        if local_block.is_rejected() || remote.is_rejected() {
            debug!(
                "{} disabled (local port {}, remote port {})",
                remote.kind, local_block.port, remote.port
            );
            return None;
        }
        let codec = remote
            .codecs
            .iter()
            .find_map(|rc| local_block.codec_for_payload_type(rc.payload_type));
        match codec {
            Some(codec) => Some((local_block.port, remote.port, remote.kind.to_ascii_lowercase(), codec.clone())),
            None => {
                info!("No common codec for {}: local {} / remote {}", remote.kind, local_block, remote);
                None
            }
        }
    }

    /// Media blocks of the answer to `remote`.
    ///
    /// Each accepted block carries the local port and transport with the
    /// remote-ordered intersection of codecs; every other remote block is
    /// answered with port 0.
    pub fn answer(local: &[MediaDescriptor], remote: &[MediaDescriptor]) -> Vec<MediaDescriptor> {
        remote
            .iter()
            .map(|r| {
                let accepted = local
                    .iter()
                    .find(|l| l.same_kind(r))
                    .filter(|l| !l.is_rejected() && !r.is_rejected())
                    .map(|l| {
                        let codecs: Vec<CodecDescriptor> = r
                            .codecs
                            .iter()
                            .filter_map(|rc| l.codec_for_payload_type(rc.payload_type).cloned())
                            .collect();
                        MediaDescriptor::new(r.kind.clone(), l.port, l.transport.clone(), codecs)
                    })
                    .filter(|answer| !answer.codecs.is_empty());

                accepted.unwrap_or_else(|| {
                    debug!("Rejecting remote {} block", r.kind);
                    MediaDescriptor::new(
                        r.kind.clone(),
                        0,
                        r.transport.clone(),
                        r.codecs.iter().take(1).cloned().collect(),
                    )
                })
            })
            .collect()
    }

    /// Parsed media blocks of a session description
    pub fn descriptors(&self, sdp: &SessionDescription) -> Vec<MediaDescriptor> {
        sdp.media
            .iter()
            .map(|m| MediaDescriptor::from_sdp(m, &self.catalog))
            .collect()
    }

    /// Flows for a local and remote session description.
    ///
    /// The remote address of each flow is the remote block's connection
    /// address, falling back to the session-level one. The requested
    /// direction is narrowed by the remote block's direction attribute.
    pub fn negotiate_sessions(
        &self,
        local_sdp: &SessionDescription,
        remote_sdp: &SessionDescription,
        direction: Direction,
    ) -> Vec<FlowSpec> {
        let local = self.descriptors(local_sdp);
        let mut seen = HashSet::new();
        let mut flows = Vec::new();

        for remote_media in &remote_sdp.media {
            if !seen.insert(remote_media.media.to_ascii_lowercase()) {
                continue;
            }
            let Some(remote_addr) = remote_sdp.media_connection(remote_media) else {
                warn!("Remote {} block has no connection address", remote_media.media);
                continue;
            };
            let remote_direction = remote_media.direction.or(remote_sdp.direction);
            let Some(direction) = direction.restrict(remote_direction) else {
                info!("{} inactive by remote direction", remote_media.media);
                continue;
            };
            let remote = MediaDescriptor::from_sdp(remote_media, &self.catalog);
            flows.extend(Self::negotiate(&local, std::slice::from_ref(&remote), remote_addr, direction));
        }
        flows
    }

    /// Answer session: local origin and connection, remote session name and
    /// timing, and the media blocks from [`Negotiator::answer`].
    pub fn answer_session(&self, local_sdp: &SessionDescription, remote_sdp: &SessionDescription) -> SessionDescription {
        let local = self.descriptors(local_sdp);
        let remote = self.descriptors(remote_sdp);

        let media = Self::answer(&local, &remote)
            .into_iter()
            .map(|answer| {
                let mut block = answer.to_sdp();
                if !answer.is_rejected() {
                    block.direction = local_sdp.media_of_kind(&answer.kind).and_then(|m| m.direction);
                }
                block
            })
            .collect();

        SessionDescription {
            origin: local_sdp.origin.clone(),
            session_name: remote_sdp.session_name.clone(),
            connection: local_sdp.connection,
            timing: remote_sdp.timing.clone(),
            direction: None,
            other_lines: Vec::new(),
            media,
        }
    }
}
