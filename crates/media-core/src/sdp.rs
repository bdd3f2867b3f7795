//! Session description boundary
//!
//! A deliberately small SDP model: the connection address (`c=`), media
//! blocks (`m=`), `a=rtpmap` and the direction attributes are interpreted.
//! Every other line is kept verbatim so a parsed description prints back
//! with nothing lost.

use std::fmt;
use std::net::IpAddr;

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, space1},
    combinator::{map_res, opt, rest},
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// SDP media direction attribute (e.g. sendrecv, sendonly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    /// Parse an attribute name (`sendonly`, ...)
    pub fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaDirection::SendRecv => write!(f, "sendrecv"),
            MediaDirection::SendOnly => write!(f, "sendonly"),
            MediaDirection::RecvOnly => write!(f, "recvonly"),
            MediaDirection::Inactive => write!(f, "inactive"),
        }
    }
}

/// `a=rtpmap:<payload type> <encoding name>/<clock rate>[/<encoding parameters>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    pub encoding_params: Option<String>,
}

impl RtpMap {
    pub fn new(payload_type: u8, encoding_name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            payload_type,
            encoding_name: encoding_name.into(),
            clock_rate,
            encoding_params: None,
        }
    }

    /// Parse the attribute value (the part after `rtpmap:`)
    pub fn parse(value: &str) -> Option<Self> {
        match rtpmap_parser(value.trim()) {
            Ok((_, (payload_type, encoding_name, clock_rate, encoding_params))) => Some(Self {
                payload_type,
                encoding_name: encoding_name.to_string(),
                clock_rate,
                encoding_params: encoding_params.map(str::to_string),
            }),
            Err(_) => None,
        }
    }
}

impl fmt::Display for RtpMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.payload_type, self.encoding_name, self.clock_rate)?;
        if let Some(params) = &self.encoding_params {
            write!(f, "/{}", params)?;
        }
        Ok(())
    }
}

fn payload_type(input: &str) -> IResult<&str, u8> {
    map_res(digit1, |s: &str| match s.parse::<u8>() {
        Ok(pt) if pt <= 127 => Ok(pt),
        _ => Err(()),
    })(input)
}

fn clock_rate(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

fn encoding_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != '/' && !c.is_whitespace())(input)
}

fn rtpmap_parser(input: &str) -> IResult<&str, (u8, &str, u32, Option<&str>)> {
    let (input, (pt, _, name, rate, params)) = tuple((
        payload_type,
        space1,
        encoding_name,
        preceded(char('/'), clock_rate),
        opt(preceded(char('/'), rest)),
    ))(input)?;
    Ok((input, (pt, name, rate, params)))
}

/// Parse the address out of a `c=` value, `IN IP4 192.0.2.1[/ttl]`
fn parse_connection(value: &str) -> Option<IpAddr> {
    let address = value.split_whitespace().nth(2)?;
    address.split('/').next()?.parse().ok()
}

fn connection_line(addr: &IpAddr) -> String {
    let addr_type = if addr.is_ipv4() { "IP4" } else { "IP6" };
    format!("c=IN {} {}", addr_type, addr)
}

/// One `m=` block and its attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMedia {
    /// Media type (e.g. "audio", "video")
    pub media: String,
    pub port: u16,
    /// Transport protocol (e.g. "RTP/AVP")
    pub protocol: String,
    /// Format list as written on the `m=` line
    pub formats: Vec<String>,
    /// Media-level connection address
    pub connection: Option<IpAddr>,
    pub direction: Option<MediaDirection>,
    pub rtpmaps: Vec<RtpMap>,
    /// Uninterpreted lines of this block, without their trailing CRLF
    pub other_lines: Vec<String>,
}

impl SdpMedia {
    pub fn new(media: impl Into<String>, port: u16, protocol: impl Into<String>, formats: Vec<String>) -> Self {
        Self {
            media: media.into(),
            port,
            protocol: protocol.into(),
            formats,
            connection: None,
            direction: None,
            rtpmaps: Vec::new(),
            other_lines: Vec::new(),
        }
    }

    pub fn with_rtpmap(mut self, rtpmap: RtpMap) -> Self {
        self.rtpmaps.push(rtpmap);
        self
    }

    pub fn with_direction(mut self, direction: MediaDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Numeric formats, in `m=` line order; non-numeric entries are skipped
    pub fn payload_types(&self) -> Vec<u8> {
        self.formats.iter().filter_map(|f| f.parse().ok()).collect()
    }

    /// The `a=rtpmap` entry for a payload type
    pub fn rtpmap(&self, payload_type: u8) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|m| m.payload_type == payload_type)
    }

    fn parse_media_line(value: &str, line: usize) -> Result<Self> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::sdp(line, format!("invalid media description: {}", value)));
        }
        let port_str = parts[1].split('/').next().unwrap_or_default();
        let port = port_str
            .parse::<u16>()
            .map_err(|_| Error::sdp(line, format!("invalid port: {}", parts[1])))?;
        let formats = parts[3..].iter().map(|s| s.to_string()).collect();
        Ok(SdpMedia::new(parts[0], port, parts[2], formats))
    }

    fn apply_line(&mut self, kind: char, value: &str) {
        match kind {
            'c' => match parse_connection(value) {
                Some(addr) => self.connection = Some(addr),
                None => self.other_lines.push(format!("c={}", value)),
            },
            'a' => {
                if let Some(map) = value.strip_prefix("rtpmap:").and_then(RtpMap::parse) {
                    self.rtpmaps.push(map);
                } else if let Some(direction) = MediaDirection::from_attribute(value) {
                    self.direction = Some(direction);
                } else {
                    self.other_lines.push(format!("a={}", value));
                }
            }
            _ => self.other_lines.push(format!("{}={}", kind, value)),
        }
    }
}

impl fmt::Display for SdpMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {} {}", self.media, self.port, self.protocol)?;
        for format in &self.formats {
            write!(f, " {}", format)?;
        }
        write!(f, "\r\n")?;
        if let Some(addr) = &self.connection {
            write!(f, "{}\r\n", connection_line(addr))?;
        }
        for map in &self.rtpmaps {
            write!(f, "a=rtpmap:{}\r\n", map)?;
        }
        for line in &self.other_lines {
            write!(f, "{}\r\n", line)?;
        }
        if let Some(direction) = &self.direction {
            write!(f, "a={}\r\n", direction)?;
        }
        Ok(())
    }
}

/// A complete session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// `o=` value
    pub origin: String,
    /// `s=` value
    pub session_name: String,
    /// Session-level connection address
    pub connection: Option<IpAddr>,
    /// `t=` value
    pub timing: String,
    pub direction: Option<MediaDirection>,
    /// Uninterpreted session-level lines
    pub other_lines: Vec<String>,
    pub media: Vec<SdpMedia>,
}

impl SessionDescription {
    /// New description owned by `owner`, reachable at `addr`
    pub fn new(owner: &str, addr: IpAddr) -> Self {
        let addr_type = if addr.is_ipv4() { "IP4" } else { "IP6" };
        Self {
            origin: format!("{} 0 0 IN {} {}", owner, addr_type, addr),
            session_name: "Session SIP/SDP".to_string(),
            connection: Some(addr),
            timing: "0 0".to_string(),
            direction: None,
            other_lines: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: SdpMedia) -> Self {
        self.media.push(media);
        self
    }

    /// Parse an SDP body. Accepts CRLF or bare LF line endings.
    pub fn parse(body: &str) -> Result<Self> {
        let mut origin = None;
        let mut session_name = None;
        let mut timing = None;
        let mut connection = None;
        let mut direction = None;
        let mut other_lines = Vec::new();
        let mut media: Vec<SdpMedia> = Vec::new();

        for (index, raw) in body.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }
            let (kind, value) = match line.split_once('=') {
                Some((kind, value)) if kind.len() == 1 => (kind.chars().next().unwrap_or('?'), value),
                _ => return Err(Error::sdp(line_no, format!("not a type=value line: {}", line))),
            };

            if kind == 'm' {
                media.push(SdpMedia::parse_media_line(value, line_no)?);
                continue;
            }
            if let Some(block) = media.last_mut() {
                block.apply_line(kind, value);
                continue;
            }

            match kind {
                'v' => {
                    if value.trim() != "0" {
                        return Err(Error::sdp(line_no, format!("unsupported version {}", value)));
                    }
                }
                'o' => origin = Some(value.to_string()),
                's' => session_name = Some(value.to_string()),
                't' => timing = Some(value.to_string()),
                'c' => match parse_connection(value) {
                    Some(addr) => connection = Some(addr),
                    None => return Err(Error::sdp(line_no, format!("invalid connection: {}", value))),
                },
                'a' => match MediaDirection::from_attribute(value) {
                    Some(d) => direction = Some(d),
                    None => other_lines.push(line.to_string()),
                },
                _ => other_lines.push(line.to_string()),
            }
        }

        Ok(Self {
            origin: origin.unwrap_or_else(|| "- 0 0 IN IP4 0.0.0.0".to_string()),
            session_name: session_name.unwrap_or_else(|| "-".to_string()),
            connection,
            timing: timing.unwrap_or_else(|| "0 0".to_string()),
            direction,
            other_lines,
            media,
        })
    }

    /// Connection address for a media block: its own `c=` or the session's
    pub fn media_connection(&self, media: &SdpMedia) -> Option<IpAddr> {
        media.connection.or(self.connection)
    }

    /// First block of the given kind (case-insensitive)
    pub fn media_of_kind(&self, kind: &str) -> Option<&SdpMedia> {
        self.media.iter().find(|m| m.media.eq_ignore_ascii_case(kind))
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.session_name)?;
        if let Some(addr) = &self.connection {
            write!(f, "{}\r\n", connection_line(addr))?;
        }
        write!(f, "t={}\r\n", self.timing)?;
        for line in &self.other_lines {
            write!(f, "{}\r\n", line)?;
        }
        if let Some(direction) = &self.direction {
            write!(f, "a={}\r\n", direction)?;
        }
        for media in &self.media {
            write!(f, "{}", media)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SessionDescription {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
