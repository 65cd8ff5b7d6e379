//! UDP IP discovery: learn the public address the voice server sees us at.

pub const DISCOVERY_PACKET_LEN: usize = 70;
const ADDRESS_RANGE: std::ops::Range<usize> = 4..68;
const PORT_RANGE: std::ops::Range<usize> = 68..70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub address: String,
    pub port: u16,
}

/// Discovery request: SSRC big-endian up front, zeros after.
pub fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_LEN] {
    let mut packet = [0u8; DISCOVERY_PACKET_LEN];
    packet[..4].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

/// Whether `packet` is shaped like the reply to our own discovery request.
pub fn is_reply_for(packet: &[u8], ssrc: u32) -> bool {
    packet.len() == DISCOVERY_PACKET_LEN && packet[..4] == ssrc.to_be_bytes()
}

/// Parse a discovery reply. The address is NUL padded; the port is little-endian.
pub fn parse_discovery_reply(packet: &[u8]) -> Option<DiscoveredAddress> {
    if packet.len() < DISCOVERY_PACKET_LEN {
        return None;
    }
    let raw = &packet[ADDRESS_RANGE];
    let address = String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string();
    if address.is_empty() {
        return None;
    }
    let port = u16::from_le_bytes([packet[PORT_RANGE.start], packet[PORT_RANGE.start + 1]]);
    Some(DiscoveredAddress { address, port })
}
