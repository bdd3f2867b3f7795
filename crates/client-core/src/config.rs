//! User agent profile
//!
//! Everything a [`crate::UserAgent`] needs to know about the local party:
//! identity, offered media, automatic call handling and the media agent
//! tuning knobs.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sippin_codec_core::{CodecCatalog, CodecOverrides};
use sippin_media_core::{
    Direction, MediaAgentConfig, MediaDescriptor, RtpMap, SdpMedia, SessionDescription, DEFAULT_TRANSPORT,
};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Default local audio port
pub const DEFAULT_AUDIO_PORT: u16 = 4000;

/// Default local video port
pub const DEFAULT_VIDEO_PORT: u16 = 4002;

/// Seconds an incoming call may ring before it is refused
pub const DEFAULT_REFUSE_TIME: u64 = 20;

/// Seconds a registration binding is requested for
pub const DEFAULT_EXPIRES: u64 = 3600;

/// Video format announced when video is enabled
const VIDEO_PAYLOAD_TYPE: u8 = 103;

/// Configuration of the local party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentProfile {
    /// User name, also the SDP origin owner
    pub user: String,
    pub display_name: Option<String>,

    /// Address written in the SDP connection line
    pub media_addr: IpAddr,
    /// First media port; overrides the per-media ports, each block taking the
    /// next even port
    pub media_port: Option<u16>,

    pub audio: bool,
    pub video: bool,
    pub audio_port: u16,
    pub video_port: u16,
    /// Offered audio codecs in preference order
    pub audio_codecs: Vec<String>,
    pub audio_packet_size: Option<u32>,
    pub audio_sample_rate: Option<u32>,

    pub recv_only: bool,
    pub send_only: bool,
    pub send_tone: bool,
    pub loopback: bool,
    /// Send INVITEs without an offer and answer in the ACK
    pub no_offer: bool,

    /// Seconds before an unanswered incoming call is refused
    pub refuse_time: Option<u64>,
    /// Seconds before an incoming call is accepted automatically
    pub accept_time: Option<u64>,
    /// Seconds before an established call is hung up automatically
    pub hangup_time: Option<u64>,
    /// Redirect every incoming call to this target
    pub redirect_to: Option<String>,

    /// Registration binding lifetime in seconds; renewed at half of it
    pub expires: u64,
    /// Milliseconds between keep-alive datagrams while registered, 0 disables
    pub keepalive_time: u64,

    pub symmetric_rtp: bool,
    pub sync: bool,
    pub sync_adjustment_ms: u64,
    pub red_rate: u32,
    pub early_drop_ms: u64,
}

impl Default for UserAgentProfile {
    fn default() -> Self {
        Self {
            user: "user".to_string(),
            display_name: None,
            media_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            media_port: None,
            audio: true,
            video: false,
            audio_port: DEFAULT_AUDIO_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            audio_codecs: vec!["PCMU".to_string(), "PCMA".to_string(), "GSM".to_string()],
            audio_packet_size: None,
            audio_sample_rate: None,
            recv_only: false,
            send_only: false,
            send_tone: false,
            loopback: false,
            no_offer: false,
            refuse_time: Some(DEFAULT_REFUSE_TIME),
            accept_time: None,
            hangup_time: None,
            redirect_to: None,
            expires: DEFAULT_EXPIRES,
            keepalive_time: 0,
            symmetric_rtp: false,
            sync: true,
            sync_adjustment_ms: 0,
            red_rate: 0,
            early_drop_ms: 200,
        }
    }
}

impl UserAgentProfile {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    /// Load a profile from a TOML or JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let profile: Self = sippin_infra_common::load_config(path)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn with_media_addr(mut self, addr: IpAddr) -> Self {
        self.media_addr = addr;
        self
    }

    pub fn with_media_port(mut self, port: u16) -> Self {
        self.media_port = Some(port);
        self
    }

    pub fn with_audio_port(mut self, port: u16) -> Self {
        self.audio_port = port;
        self
    }

    pub fn with_audio_codecs(mut self, codecs: &[&str]) -> Self {
        self.audio_codecs = codecs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio = enabled;
        self
    }

    pub fn with_video(mut self, enabled: bool) -> Self {
        self.video = enabled;
        self
    }

    pub fn with_recv_only(mut self, enabled: bool) -> Self {
        self.recv_only = enabled;
        self
    }

    pub fn with_send_only(mut self, enabled: bool) -> Self {
        self.send_only = enabled;
        self
    }

    pub fn with_no_offer(mut self, enabled: bool) -> Self {
        self.no_offer = enabled;
        self
    }

    pub fn with_loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    pub fn with_send_tone(mut self, enabled: bool) -> Self {
        self.send_tone = enabled;
        self
    }

    pub fn with_symmetric_rtp(mut self, enabled: bool) -> Self {
        self.symmetric_rtp = enabled;
        self
    }

    pub fn with_refuse_time(mut self, seconds: Option<u64>) -> Self {
        self.refuse_time = seconds;
        self
    }

    pub fn with_accept_time(mut self, seconds: Option<u64>) -> Self {
        self.accept_time = seconds;
        self
    }

    pub fn with_hangup_time(mut self, seconds: Option<u64>) -> Self {
        self.hangup_time = seconds;
        self
    }

    pub fn with_redirect_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    pub fn with_expires(mut self, seconds: u64) -> Self {
        self.expires = seconds;
        self
    }

    pub fn with_keepalive_time(mut self, millis: u64) -> Self {
        self.keepalive_time = millis;
        self
    }

    /// Reject contradictory or incomplete profiles
    pub fn validate(&self) -> ClientResult<()> {
        if self.user.trim().is_empty() {
            return Err(ClientError::MissingConfiguration {
                field: "user".to_string(),
            });
        }
        if self.recv_only && self.send_only {
            return Err(ClientError::invalid_configuration(
                "recv_only",
                "recv_only and send_only are mutually exclusive",
            ));
        }
        if self.audio && self.audio_codecs.is_empty() {
            return Err(ClientError::invalid_configuration(
                "audio_codecs",
                "audio is enabled but no codec is listed",
            ));
        }
        if self.audio_packet_size == Some(0) {
            return Err(ClientError::invalid_configuration("audio_packet_size", "must be positive"));
        }
        if self.expires == 0 {
            return Err(ClientError::invalid_configuration("expires", "must be positive"));
        }
        Ok(())
    }

    /// Media direction requested by the profile flags
    pub fn direction(&self) -> Direction {
        Direction::from_flags(self.recv_only, self.send_only)
    }

    pub fn refuse_timeout(&self) -> Option<Duration> {
        self.refuse_time.map(Duration::from_secs)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_time.map(Duration::from_secs)
    }

    /// A zero hangup time means manual hangup
    pub fn hangup_timeout(&self) -> Option<Duration> {
        self.hangup_time.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn registration_expiry(&self) -> Duration {
        Duration::from_secs(self.expires)
    }

    /// Renewal period of a looping registration, half the binding lifetime
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.expires.saturating_mul(500).max(1000))
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keepalive_time > 0).then(|| Duration::from_millis(self.keepalive_time))
    }

    pub fn codec_overrides(&self) -> CodecOverrides {
        let mut overrides = CodecOverrides::none();
        if let Some(rate) = self.audio_sample_rate {
            overrides = overrides.with_sample_rate(rate);
        }
        if let Some(size) = self.audio_packet_size {
            overrides = overrides.with_packet_size(size);
        }
        overrides
    }

    /// Settings for the call's media agent
    pub fn media_agent_config(&self) -> MediaAgentConfig {
        MediaAgentConfig {
            symmetric_rtp: self.symmetric_rtp,
            sync: self.sync,
            sync_adjustment_ms: self.sync_adjustment_ms,
            red_rate: self.red_rate,
            early_drop_ms: self.early_drop_ms,
            send_tone: self.send_tone,
            loopback: self.loopback,
            ..Default::default()
        }
    }

    /// Local session description offered (or used to answer) on calls.
    ///
    /// Disabled media are left out. With `media_port` set, the remaining
    /// blocks take `media_port`, `media_port + 2`, and so on.
    pub fn local_session(&self, catalog: &CodecCatalog) -> SessionDescription {
        let mut sdp = SessionDescription::new(&self.user, self.media_addr);
        let mut next_port = self.media_port.filter(|p| *p > 0);
        let direction = self.direction();

        for mut block in self.media_blocks(catalog) {
            if let Some(port) = next_port {
                block.port = port;
                next_port = Some(port.saturating_add(2));
            }
            if direction != Direction::FullDuplex {
                block.direction = Some(direction.as_sdp());
            }
            sdp.media.push(block);
        }
        debug!("local session: {} media block(s)", sdp.media.len());
        sdp
    }

    fn media_blocks(&self, catalog: &CodecCatalog) -> Vec<SdpMedia> {
        let mut blocks = Vec::new();
        if self.audio {
            let audio = MediaDescriptor::audio(self.audio_port, catalog, &self.audio_codecs, &self.codec_overrides());
            blocks.push(audio.to_sdp());
        }
        if self.video {
            blocks.push(
                SdpMedia::new("video", self.video_port, DEFAULT_TRANSPORT, vec![VIDEO_PAYLOAD_TYPE.to_string()])
                    .with_rtpmap(RtpMap::new(VIDEO_PAYLOAD_TYPE, "H263-1998", 90000)),
            );
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sippin_media_core::MediaDirection;

    #[test]
    fn test_defaults() {
        let profile = UserAgentProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.audio_port, 4000);
        assert_eq!(profile.video_port, 4002);
        assert_eq!(profile.refuse_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(profile.direction(), Direction::FullDuplex);
        assert_eq!(profile.audio_codecs, vec!["PCMU", "PCMA", "GSM"]);
    }

    #[test]
    fn test_validation() {
        assert!(UserAgentProfile::new("").validate().is_err());
        assert!(UserAgentProfile::new("alice").with_recv_only(true).with_send_only(true).validate().is_err());
        assert!(UserAgentProfile::new("alice").with_audio_codecs(&[]).validate().is_err());
        // signaling-only calls
        assert!(UserAgentProfile::new("alice").with_audio(false).with_audio_codecs(&[]).validate().is_ok());
    }

    #[test]
    fn test_registration_timing() {
        let profile = UserAgentProfile::new("alice");
        assert_eq!(profile.registration_expiry(), Duration::from_secs(3600));
        assert_eq!(profile.renew_interval(), Duration::from_secs(1800));
        assert_eq!(profile.keep_alive_interval(), None);

        let short = UserAgentProfile::new("alice").with_expires(1).with_keepalive_time(250);
        assert_eq!(short.renew_interval(), Duration::from_secs(1));
        assert_eq!(short.keep_alive_interval(), Some(Duration::from_millis(250)));
        assert!(UserAgentProfile::new("alice").with_expires(0).validate().is_err());
    }

    #[test]
    fn test_local_session() {
        let catalog = CodecCatalog::standard();
        let sdp = UserAgentProfile::new("alice").local_session(&catalog);
        assert!(sdp.origin.starts_with("alice "));
        assert_eq!(sdp.connection, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(sdp.media.len(), 1);
        assert_eq!(sdp.media[0].port, 4000);
        assert_eq!(sdp.media[0].formats, vec!["0", "8", "3"]);
        assert_eq!(sdp.media[0].direction, None);
    }

    #[test]
    fn test_media_port_override_and_direction() {
        let catalog = CodecCatalog::standard();
        let sdp = UserAgentProfile::new("alice")
            .with_video(true)
            .with_media_port(7000)
            .with_recv_only(true)
            .local_session(&catalog);
        assert_eq!(sdp.media.len(), 2);
        assert_eq!((sdp.media[0].media.as_str(), sdp.media[0].port), ("audio", 7000));
        assert_eq!((sdp.media[1].media.as_str(), sdp.media[1].port), ("video", 7002));
        assert_eq!(sdp.media[0].direction, Some(MediaDirection::RecvOnly));

        let audio_off = UserAgentProfile::new("alice").with_audio(false).with_video(true).with_media_port(7000);
        let sdp = audio_off.local_session(&catalog);
        assert_eq!(sdp.media.len(), 1);
        assert_eq!(sdp.media[0].port, 7000);
    }

    #[test]
    fn test_packet_size_override_reaches_codecs() {
        let mut profile = UserAgentProfile::new("alice").with_audio_codecs(&["PCMU"]);
        profile.audio_packet_size = Some(320);
        let overrides = profile.codec_overrides();
        let pcmu = CodecCatalog::standard().resolve("PCMU", &overrides);
        assert_eq!(pcmu.packet_size, 320);
        assert_eq!(pcmu.packet_rate, 25);
    }

    #[test]
    fn test_deserialize_partial_profile() {
        let profile: UserAgentProfile = serde_json::from_str(
            r#"{"user": "bob", "audio_codecs": ["PCMA"], "refuse_time": null, "symmetric_rtp": true}"#,
        )
        .unwrap();
        assert_eq!(profile.user, "bob");
        assert_eq!(profile.refuse_time, None);
        assert!(profile.symmetric_rtp);
        assert_eq!(profile.audio_port, 4000);
        assert!(profile.media_agent_config().symmetric_rtp);
    }

    #[test]
    fn test_from_file_validates() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("sippin-profile-{}.toml", std::process::id()));
        std::fs::write(&good, "user = \"carol\"\nrecv_only = true\nhangup_time = 30\n").unwrap();
        let profile = UserAgentProfile::from_file(&good).unwrap();
        assert_eq!(profile.user, "carol");
        assert_eq!(profile.direction(), Direction::RecvOnly);
        assert_eq!(profile.hangup_timeout(), Some(Duration::from_secs(30)));

        let bad = dir.join(format!("sippin-profile-bad-{}.json", std::process::id()));
        std::fs::write(&bad, r#"{"recv_only": true, "send_only": true}"#).unwrap();
        assert!(matches!(
            UserAgentProfile::from_file(&bad),
            Err(ClientError::InvalidConfiguration { .. })
        ));

        let _ = std::fs::remove_file(good);
        let _ = std::fs::remove_file(bad);
    }
}
