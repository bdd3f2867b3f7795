//! RTP packet definitions (RFC 3550 fixed header, CSRC list, header extension).

use bitvec::prelude::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version (always 2 in practice)
pub const RTP_VERSION: u8 = 2;

/// Padding flag position in the first byte (MSB first)
pub const RTP_PADDING_FLAG: usize = 2;

/// Extension flag position in the first byte (MSB first)
pub const RTP_EXTENSION_FLAG: usize = 3;

/// CSRC count position in the first byte (4 bits, MSB first)
pub const RTP_CC_OFFSET: usize = 4;

/// Marker bit position in the second byte (MSB first)
pub const RTP_MARKER_FLAG: usize = 0;

/// Payload type position in the second byte (7 bits, MSB first)
pub const RTP_PT_OFFSET: usize = 1;

/// Minimum header size (without CSRC or extensions)
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// RTP header implementation according to RFC 3550
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (should be 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// CSRC count (number of contributing sources)
    pub cc: u8,

    /// Marker bit
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Timestamp
    pub timestamp: RtpTimestamp,

    /// Synchronization source identifier
    pub ssrc: RtpSsrc,

    /// Contributing source identifiers
    pub csrc: Vec<RtpCsrc>,

    /// Extension header ID
    pub extension_id: Option<u16>,

    /// Extension data
    pub extension_data: Option<Bytes>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl RtpHeader {
    /// Create a new RTP header with no CSRCs and no extension
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_id: None,
            extension_data: None,
        }
    }

    /// Get the size of the header in bytes
    pub fn size(&self) -> usize {
        let mut size = RTP_MIN_HEADER_SIZE + self.csrc.len() * 4;
        if self.extension {
            let ext_len = self.extension_data.as_ref().map_or(0, |d| d.len().div_ceil(4) * 4);
            size += 4 + ext_len;
        }
        size
    }

    /// Parse an RTP header from bytes
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        // version (2), padding (1), extension (1), CSRC count (4)
        let first_byte = buf.get_u8();
        let bits = first_byte.view_bits::<Msb0>();

        let version = bits[0..2].load_be::<u8>();
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("Invalid RTP version: {}", version)));
        }

        let padding = bits[RTP_PADDING_FLAG];
        let extension = bits[RTP_EXTENSION_FLAG];
        let cc = bits[RTP_CC_OFFSET..RTP_CC_OFFSET + 4].load_be::<u8>();

        // marker (1), payload type (7)
        let second_byte = buf.get_u8();
        let bits = second_byte.view_bits::<Msb0>();

        let marker = bits[RTP_MARKER_FLAG];
        let payload_type = bits[RTP_PT_OFFSET..RTP_PT_OFFSET + 7].load_be::<u8>();

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = cc as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(Error::BufferTooSmall {
                required: csrc_len,
                available: buf.remaining(),
            });
        }
        let csrc = (0..cc).map(|_| buf.get_u32()).collect();

        let (extension_id, extension_data) = if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }

            let ext_id = buf.get_u16();
            let ext_length = buf.get_u16() as usize * 4; // Length in 32-bit words

            if buf.remaining() < ext_length {
                return Err(Error::BufferTooSmall {
                    required: ext_length,
                    available: buf.remaining(),
                });
            }

            (Some(ext_id), Some(buf.copy_to_bytes(ext_length)))
        } else {
            (None, None)
        };

        Ok(Self {
            version,
            padding,
            extension,
            cc,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_id,
            extension_data,
        })
    }

    /// Serialize the header to bytes
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.cc as usize != self.csrc.len() {
            return Err(Error::InvalidParameter(format!(
                "CSRC count ({}) does not match CSRC list length ({})",
                self.cc,
                self.csrc.len()
            )));
        }
        if self.payload_type > 0x7F {
            return Err(Error::EncodeError(format!(
                "Payload type {} does not fit in 7 bits",
                self.payload_type
            )));
        }

        buf.reserve(self.size());

        let mut first_byte = 0u8;
        {
            let bits = first_byte.view_bits_mut::<Msb0>();
            bits[0..2].store_be(self.version & 0x03);
            bits.set(RTP_PADDING_FLAG, self.padding);
            bits.set(RTP_EXTENSION_FLAG, self.extension);
            bits[RTP_CC_OFFSET..RTP_CC_OFFSET + 4].store_be(self.cc & 0x0F);
        }
        buf.put_u8(first_byte);

        let mut second_byte = 0u8;
        {
            let bits = second_byte.view_bits_mut::<Msb0>();
            bits.set(RTP_MARKER_FLAG, self.marker);
            bits[RTP_PT_OFFSET..RTP_PT_OFFSET + 7].store_be(self.payload_type);
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            let (Some(ext_id), Some(ext_data)) = (self.extension_id, &self.extension_data) else {
                return Err(Error::InvalidParameter(
                    "Extension flag is set but extension data is missing".to_string(),
                ));
            };
            buf.put_u16(ext_id);
            buf.put_u16(ext_data.len().div_ceil(4) as u16);
            buf.put_slice(ext_data);
            // Pad to a 32-bit boundary
            let padding_bytes = (4 - (ext_data.len() % 4)) % 4;
            buf.put_bytes(0, padding_bytes);
        }

        Ok(())
    }
}

/// RTP packet implementation
#[derive(Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP header
    pub header: RtpHeader,

    /// Payload data
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new RTP packet
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a new RTP packet with basic parameters
    pub fn new_with_payload(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
        payload: Bytes,
    ) -> Self {
        let header = RtpHeader::new(payload_type, sequence_number, timestamp, ssrc);
        Self { header, payload }
    }

    /// Get the total size of the packet in bytes
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Parse an RTP packet from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        let header = RtpHeader::parse(&mut buf)?;

        let padding_bytes = if header.padding && !buf.is_empty() {
            let padding = buf[buf.len() - 1] as usize;
            if padding == 0 || padding > buf.len() {
                return Err(Error::InvalidPacket(format!(
                    "Invalid padding value: {} with {} remaining bytes",
                    padding,
                    buf.len()
                )));
            }
            padding
        } else {
            0
        };

        let payload_len = buf.len() - padding_bytes;
        let payload = buf.slice(0..payload_len);

        Ok(Self { header, payload })
    }

    /// Serialize the packet to bytes. Padding is never emitted.
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        let mut header = self.header.clone();
        header.padding = false;
        header.serialize(&mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_header_serialize_parse() {
        let mut original = RtpHeader::new(96, 1000, 0x12345678, 0xabcdef01);
        original.marker = true;

        let mut buf = BytesMut::with_capacity(12);
        original.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), RTP_MIN_HEADER_SIZE);
        // V=2, no padding/extension/CSRC; marker + PT 96
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x80 | 96);

        let mut reader = buf.freeze();
        let parsed = RtpHeader::parse(&mut reader).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_known_bytes() {
        // V=2, P=0, X=0, CC=1, M=0, PT=8, seq=7, ts=160, ssrc=1, csrc=2, payload ab cd
        let data = [
            0x81, 0x08, 0x00, 0x07, 0x00, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x02, 0xAB, 0xCD,
        ];
        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.header.payload_type, 8);
        assert_eq!(packet.header.sequence_number, 7);
        assert_eq!(packet.header.timestamp, 160);
        assert_eq!(packet.header.csrc, vec![2]);
        assert!(!packet.header.marker);
        assert_eq!(&packet.payload[..], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_padding_and_extension() {
        // X=1 with one word of extension data, P=1 with two padding bytes
        let data = [
            0xB0, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xBE, 0xDE,
            0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x55, 0x00, 0x02,
        ];
        let packet = RtpPacket::parse(&data).unwrap();
        assert!(packet.header.padding);
        assert_eq!(packet.header.extension_id, Some(0xBEDE));
        assert_eq!(packet.header.extension_data.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(&packet.payload[..], &[0x55]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            RtpPacket::parse(&[0x80, 0x00, 0x00]),
            Err(Error::BufferTooSmall { required: 12, available: 3 })
        ));
        let mut v1 = [0u8; 12];
        v1[0] = 0x40;
        assert!(matches!(RtpPacket::parse(&v1), Err(Error::InvalidPacket(_))));

        let bad_cc = RtpHeader { cc: 2, ..RtpHeader::new(0, 0, 0, 0) };
        assert!(bad_cc.serialize(&mut BytesMut::new()).is_err());
    }

    #[test]
    fn test_packet_roundtrip_keeps_payload() {
        let packet = RtpPacket::new_with_payload(0, 65535, 20, 42, Bytes::from_static(&[0xFF; 160]));
        let bytes = packet.serialize().unwrap();
        assert_eq!(bytes.len(), packet.size());
        assert_eq!(RtpPacket::parse(&bytes).unwrap(), packet);
    }
}
