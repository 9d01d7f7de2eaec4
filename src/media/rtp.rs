//! RTP fixed-header parsing
//!
//! ```text
//!  0               1                 2               3
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |V=2|P|X|  CC |M|     PT        | sequence number               |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  | timestamp                                                     |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  | synchronization source (SSRC) identifier                      |
//!  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//!  | contributing source (CSRC) identifiers ...                    |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

/// Length of the fixed RTP header.
pub const RTP_FIXED_HEADER_LENGTH: usize = 12;

/// Decoded RTP fixed header plus the computed payload window.
///
/// The packet borrows nothing: `payload_offset..payload_end` index into
/// the buffer the packet was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_offset: usize,
    pub payload_end: usize,
}

impl RtpPacket {
    /// Parse the fixed header and locate the payload.
    ///
    /// Steps over the CSRC list, the extension header when present, and
    /// trims trailing padding. Returns `None` when any step would run off
    /// the buffer or when no payload byte remains.
    pub fn parse(buf: &[u8]) -> Option<RtpPacket> {
        if buf.len() < RTP_FIXED_HEADER_LENGTH {
            return None;
        }

        let first = buf[0];
        let second = buf[1];
        let csrc_count = first & 0x0f;
        let extension = (first >> 4) & 1 == 1;
        let padding = (first >> 5) & 1 == 1;

        let mut offset = RTP_FIXED_HEADER_LENGTH;
        let mut end = buf.len();

        if end - offset >= 4 * csrc_count as usize {
            offset += 4 * csrc_count as usize;
        }

        if extension && end - offset >= 4 {
            let ext_len = 4 * u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4;
            if end - offset >= ext_len {
                offset += ext_len;
            }
        }

        if padding && end > offset {
            let pad_len = buf[end - 1] as usize;
            if end - offset >= pad_len {
                end -= pad_len;
            }
        }

        if end <= offset {
            return None;
        }

        Some(RtpPacket {
            version: first >> 6,
            padding,
            extension,
            csrc_count,
            marker: second >> 7 == 1,
            payload_type: second & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload_offset: offset,
            payload_end: end,
        })
    }

    /// The payload window inside the buffer this packet was parsed from.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.payload_offset..self.payload_end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_header(first: u8, second: u8, seq: u16) -> Vec<u8> {
        let mut buf = vec![first, second];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&0x01020304u32.to_be_bytes()); // timestamp
        buf.extend_from_slice(&0xdeadbeefu32.to_be_bytes()); // ssrc
        buf
    }

    #[test]
    fn test_parse_minimal() {
        let mut buf = fixed_header(0x80, 0xe0, 7);
        buf.extend_from_slice(b"payload");

        let pkt = RtpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.version, 2);
        assert!(!pkt.padding);
        assert!(!pkt.extension);
        assert_eq!(pkt.csrc_count, 0);
        assert!(pkt.marker);
        assert_eq!(pkt.payload_type, 0x60);
        assert_eq!(pkt.sequence_number, 7);
        assert_eq!(pkt.timestamp, 0x01020304);
        assert_eq!(pkt.ssrc, 0xdeadbeef);
        assert_eq!(pkt.payload(&buf), b"payload");
        assert_eq!(pkt.payload_offset, 12);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(RtpPacket::parse(&[0x80; 11]).is_none());
    }

    #[test]
    fn test_parse_empty_payload() {
        let buf = fixed_header(0x80, 0x60, 1);
        assert!(RtpPacket::parse(&buf).is_none());
    }

    #[test]
    fn test_parse_csrc_list() {
        // CC = 2
        let mut buf = fixed_header(0x82, 0x60, 1);
        buf.extend_from_slice(&[0u8; 8]); // two CSRC entries
        buf.extend_from_slice(b"xy");

        let pkt = RtpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.csrc_count, 2);
        assert_eq!(pkt.payload_offset, 20);
        assert_eq!(pkt.payload(&buf), b"xy");
    }

    #[test]
    fn test_parse_extension() {
        // X = 1, extension of one 32-bit word
        let mut buf = fixed_header(0x90, 0x60, 1);
        buf.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01]); // profile + length=1
        buf.extend_from_slice(&[0u8; 4]); // extension word
        buf.extend_from_slice(b"data");

        let pkt = RtpPacket::parse(&buf).unwrap();
        assert!(pkt.extension);
        assert_eq!(pkt.payload_offset, 20);
        assert_eq!(pkt.payload(&buf), b"data");
    }

    #[test]
    fn test_parse_padding() {
        // P = 1, two padding bytes, last one holds the count
        let mut buf = fixed_header(0xa0, 0x60, 1);
        buf.extend_from_slice(b"real");
        buf.extend_from_slice(&[0x00, 0x02]);

        let pkt = RtpPacket::parse(&buf).unwrap();
        assert!(pkt.padding);
        assert_eq!(pkt.payload(&buf), b"real");
    }

    #[test]
    fn test_parse_padding_consumes_everything() {
        // padding claims the whole payload
        let mut buf = fixed_header(0xa0, 0x60, 1);
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x04]);
        assert!(RtpPacket::parse(&buf).is_none());
    }

    #[test]
    fn test_parse_combined() {
        // CC = 1, X = 1, P = 1
        let mut buf = fixed_header(0xb1, 0x60, 42);
        buf.extend_from_slice(&[1, 2, 3, 4]); // CSRC
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]); // ext header, 2 words
        buf.extend_from_slice(&[0u8; 8]); // ext body
        buf.extend_from_slice(b"media");
        buf.extend_from_slice(&[0x00, 0x00, 0x03]); // 3 padding bytes

        let pkt = RtpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.payload(&buf), b"media");
        assert_eq!(pkt.payload_offset, 12 + 4 + 4 + 8);
    }
}
