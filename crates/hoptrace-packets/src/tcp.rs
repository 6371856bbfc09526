//! Fixed-layout TCP header codec.
//!
//! Decodes the fields the receivers correlate on from a raw byte buffer.
//! Capture buffers are sized from the header bound constants below: an IPv4
//! header spans 20–60 bytes, a TCP header 20–60 bytes, an IPv6 header is a
//! fixed 40 bytes, and an ICMP header 8 bytes.

use hoptrace_core::TraceError;

/// Minimum IPv4 header length (no options).
pub const MIN_IPV4_HEADER_LEN: usize = 20;
/// Maximum IPv4 header length (full options).
pub const MAX_IPV4_HEADER_LEN: usize = 60;
/// Fixed IPv6 header length.
pub const MIN_IPV6_HEADER_LEN: usize = 40;
/// Minimum TCP header length (no options).
pub const MIN_TCP_HEADER_LEN: usize = 20;
/// Maximum TCP header length (full options).
pub const MAX_TCP_HEADER_LEN: usize = 60;
/// ICMP/ICMPv6 header length.
pub const ICMP_HEADER_LEN: usize = 8;

/// TCP flag bits as laid out in the header's 13th byte.
pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const ACK: u8 = 0x10;

/// The fields of a TCP segment header the receivers correlate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Sequence number.
    pub seq: u32,
    /// Acknowledgment number.
    pub ack: u32,
    /// Header length in bytes, decoded from the data-offset field.
    pub header_len: u8,
    /// Flag bits (low 6 bits of byte 13).
    pub flags: u8,
}

impl TcpHeader {
    /// Parses a TCP header from the start of `buf`.
    ///
    /// Options are tolerated: the data offset is decoded but only the fixed
    /// 20-byte prefix is read. Fails with `PacketTooShort` on undersized
    /// input; never panics.
    pub fn parse(buf: &[u8]) -> Result<Self, TraceError> {
        if buf.len() < MIN_TCP_HEADER_LEN {
            return Err(TraceError::PacketTooShort {
                expected: MIN_TCP_HEADER_LEN,
                actual: buf.len(),
            });
        }

        Ok(Self {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ack: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            header_len: (buf[12] >> 4) * 4,
            flags: buf[13] & 0x3f,
        })
    }

    /// True when the RST flag is set.
    pub fn has_rst(&self) -> bool {
        self.flags & RST == RST
    }

    /// True when the ACK flag is set.
    pub fn has_ack(&self) -> bool {
        self.flags & ACK == ACK
    }

    /// True when the SYN flag is set.
    pub fn has_syn(&self) -> bool {
        self.flags & SYN == SYN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 20-byte header with src 80, dst 40001, seq 0x05123456,
    /// ack 0x05123457, offset 5, flags RST|ACK.
    fn sample_header() -> [u8; 20] {
        [
            0x00, 0x50, // src port 80
            0x9c, 0x41, // dst port 40001
            0x05, 0x12, 0x34, 0x56, // seq
            0x05, 0x12, 0x34, 0x57, // ack
            0x50, // offset 5 words
            RST | ACK, // flags
            0x04, 0x00, // window
            0x00, 0x00, // checksum
            0x00, 0x00, // urgent pointer
        ]
    }

    #[test]
    fn test_parse_fields() {
        let hdr = TcpHeader::parse(&sample_header()).unwrap();
        assert_eq!(hdr.src_port, 80);
        assert_eq!(hdr.dst_port, 40001);
        assert_eq!(hdr.seq, 0x0512_3456);
        assert_eq!(hdr.ack, 0x0512_3457);
        assert_eq!(hdr.header_len, 20);
        assert!(hdr.has_rst());
        assert!(hdr.has_ack());
        assert!(!hdr.has_syn());
    }

    #[test]
    fn test_parse_tolerates_options() {
        let mut bytes = sample_header();
        bytes[12] = 0x80; // offset 8 words: 32-byte header
        let hdr = TcpHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.header_len, 32);
        // The fixed prefix still decodes even though the options are absent
        // from the buffer.
        assert_eq!(hdr.src_port, 80);
    }

    #[test]
    fn test_parse_short_buffer_fails() {
        let err = TcpHeader::parse(&sample_header()[..19]).unwrap_err();
        match err {
            TraceError::PacketTooShort { expected, actual } => {
                assert_eq!(expected, MIN_TCP_HEADER_LEN);
                assert_eq!(actual, 19);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_empty_buffer_fails() {
        assert!(TcpHeader::parse(&[]).is_err());
    }

    #[test]
    fn test_flag_masking_ignores_reserved_bits() {
        let mut bytes = sample_header();
        bytes[13] = 0xc0 | SYN; // reserved bits set alongside SYN
        let hdr = TcpHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.flags, SYN);
        assert!(hdr.has_syn());
    }
}
