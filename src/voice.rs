//! Encrypted voice over UDP, driven by a voice control websocket.
//!
//! - [`VoiceSession`]: control-socket handshake (identify, ready, protocol
//!   selection, session key) and heartbeat.
//! - [`VoiceUdp`]: the datagram side, with IP discovery, RTP framing,
//!   XSalsa20-Poly1305 encryption, and a bounded, single-in-flight send queue.
//!
//! The UDP task moves through `NoSocket`, `AwaitingDiscovery` and
//! `AwaitingKey` before it is `Active`. Discovery requests made before the
//! socket exists are held and sent once it does. A lost socket is never
//! reopened.

pub mod crypto;
pub mod discovery;
pub mod protocol;
pub mod queue;
pub mod rtp;
mod session;
mod udp;

pub use crypto::{CryptoError, PacketCipher, SecretBox};
pub use discovery::DiscoveredAddress;
pub use protocol::VoiceMessage;
pub use session::{VoiceHandle, VoiceServerInfo, VoiceSession, VOICE_GATEWAY_VERSION};
pub use udp::{
    decode_inbound, encode_outbound, Inbound, ReceivedAudio, SendStatus, TokioUdpConnector,
    UdpConnector, VoiceSocket, VoiceUdp, VoiceUdpHandle,
};

use crate::error::ProtocolError;

/// Events produced by a voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The session key is installed; audio can flow.
    Ready,
    Audio(ReceivedAudio),
    /// Burst mode wants this many more frames.
    BurstRequest { count: usize },
    /// Another participant started or stopped speaking.
    Speaking { user_id: Option<String>, ssrc: Option<u32>, speaking: bool },
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice connect failed: {0}")]
    Connect(String),
    #[error("voice handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The voice task is no longer running.
    #[error("voice connection closed")]
    Closed,
}
