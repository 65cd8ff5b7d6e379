//! RTP framing for voice packets.

use rand::Rng;

use super::crypto::NONCE_LEN;

pub const RTP_HEADER_LEN: usize = 12;
/// V=2, no padding, no extension, no CSRCs.
pub const RTP_VERSION_BYTE: u8 = 0x80;
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;
/// Samples per 20 ms frame at 48 kHz.
pub const RTP_TIMESTAMP_STEP: u32 = 960;
/// Header extension present (RFC 5285).
pub const EXTENSION_FLAG: u8 = 0x10;
/// One-byte header extension profile.
pub const EXTENSION_PROFILE: u16 = 0xBEDE;
/// Anything shorter cannot hold a header plus a tag.
pub const MIN_PACKET_LEN: usize = 16;
/// Second header byte of RTCP sender and receiver reports.
pub const RTCP_SENDER_REPORT: u8 = 200;
pub const RTCP_RECEIVER_REPORT: u8 = 201;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub flags: u8,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for an outgoing Opus frame.
    pub fn opus(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            flags: RTP_VERSION_BYTE,
            payload_type: RTP_OPUS_PAYLOAD_TYPE,
            sequence,
            timestamp,
            ssrc,
        }
    }

    pub fn parse(packet: &[u8]) -> Option<Self> {
        let h = packet.get(..RTP_HEADER_LEN)?;
        Some(Self {
            flags: h[0],
            payload_type: h[1],
            sequence: u16::from_be_bytes([h[2], h[3]]),
            timestamp: u32::from_be_bytes([h[4], h[5], h[6], h[7]]),
            ssrc: u32::from_be_bytes([h[8], h[9], h[10], h[11]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let mut out = [0u8; RTP_HEADER_LEN];
        out[0] = self.flags;
        out[1] = self.payload_type;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }

    pub fn has_extension(&self) -> bool {
        self.flags & EXTENSION_FLAG != 0
    }
}

/// Packet nonce: the 12 header bytes followed by zeros.
pub fn nonce(header: &[u8]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    let len = header.len().min(RTP_HEADER_LEN);
    nonce[..len].copy_from_slice(&header[..len]);
    nonce
}

/// Packets that are dropped before any decryption is attempted.
pub fn should_discard(packet: &[u8]) -> bool {
    packet.len() < MIN_PACKET_LEN
        || matches!(packet[1], RTCP_SENDER_REPORT | RTCP_RECEIVER_REPORT)
}

/// Skip the header extension at the front of a decrypted payload.
///
/// Returns `None` when the declared length runs past the payload.
pub fn strip_extension(payload: &[u8]) -> Option<&[u8]> {
    let head = payload.get(..4)?;
    let profile = u16::from_be_bytes([head[0], head[1]]);
    if profile != EXTENSION_PROFILE {
        tracing::trace!(profile, "unexpected rtp extension profile");
    }
    let words = u16::from_be_bytes([head[2], head[3]]) as usize;
    payload.get(4 + words * 4..)
}

/// Owns the outgoing sequence number and timestamp.
#[derive(Debug, Clone)]
pub struct RtpSequencer {
    sequence: u16,
    timestamp: u32,
}

impl RtpSequencer {
    /// Start from random values.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self::with_start(rng.random(), rng.random())
    }

    pub fn with_start(sequence: u16, timestamp: u32) -> Self {
        Self { sequence, timestamp }
    }

    /// Values for the next frame, then advance. Both wrap.
    pub fn advance(&mut self) -> (u16, u32) {
        let current = (self.sequence, self.timestamp);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);
        current
    }
}

impl Default for RtpSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let header = RtpHeader::opus(0x0102, 0x0304_0506, 0x0708_090a);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x80, 0x78, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(RtpHeader::parse(&bytes), Some(header));
        assert!(!header.has_extension());
    }

    #[test]
    fn nonce_pads_header() {
        let header = RtpHeader::opus(1, 2, 3).to_bytes();
        let nonce = nonce(&header);
        assert_eq!(&nonce[..12], &header);
        assert!(nonce[12..].iter().all(|b| *b == 0));
    }

    #[test]
    fn discards_short_and_rtcp() {
        assert!(should_discard(&[0x80; 15]));
        let mut rtcp = [0u8; 32];
        rtcp[1] = RTCP_SENDER_REPORT;
        assert!(should_discard(&rtcp));
        rtcp[1] = RTCP_RECEIVER_REPORT;
        assert!(should_discard(&rtcp));
        rtcp[1] = RTP_OPUS_PAYLOAD_TYPE;
        assert!(!should_discard(&rtcp));
    }

    #[test]
    fn extension_is_skipped_by_word_count() {
        let payload = [0xBE, 0xDE, 0x00, 0x02, 1, 2, 3, 4, 5, 6, 7, 8, 0xAA, 0xBB];
        assert_eq!(strip_extension(&payload), Some(&[0xAA, 0xBB][..]));
        assert_eq!(strip_extension(&[0xBE, 0xDE, 0x00, 0x09, 1]), None);
        assert_eq!(strip_extension(&[0xBE]), None);
    }

    #[test]
    fn sequencer_wraps() {
        let mut seq = RtpSequencer::with_start(u16::MAX, u32::MAX - 100);
        assert_eq!(seq.advance(), (u16::MAX, u32::MAX - 100));
        assert_eq!(seq.advance(), (0, (u32::MAX - 100).wrapping_add(960)));
    }
}
