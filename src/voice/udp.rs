use async_trait::async_trait;
use futures::future::OptionFuture;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::crypto::{CryptoError, PacketCipher, SecretBox};
use super::discovery::{discovery_request, is_reply_for, parse_discovery_reply, DiscoveredAddress};
use super::queue::SendQueue;
use super::rtp::{self, RtpHeader, RtpSequencer, RTP_HEADER_LEN};
use super::{VoiceError, VoiceEvent};
use crate::config::VoiceConfig;

/// Largest datagram we expect to read.
const RECV_BUFFER_LEN: usize = 1500;

/// A connected datagram socket.
#[async_trait]
pub trait VoiceSocket: Send + Sync + 'static {
    async fn send(&self, packet: &[u8]) -> io::Result<usize>;
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl VoiceSocket for UdpSocket {
    async fn send(&self, packet: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, packet).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }
}

/// Opens the voice UDP socket once the server address is known.
#[async_trait]
pub trait UdpConnector: Send + Sync + 'static {
    async fn connect(&self, address: &str, port: u16) -> io::Result<Arc<dyn VoiceSocket>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioUdpConnector;

#[async_trait]
impl UdpConnector for TokioUdpConnector {
    async fn connect(&self, address: &str, port: u16) -> io::Result<Arc<dyn VoiceSocket>> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((address, port)).await?;
        Ok(Arc::new(socket))
    }
}

/// A decoded inbound audio packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAudio {
    pub ssrc: u32,
    pub sequence: u16,
    pub timestamp: u32,
    /// Opus payload with any header extension removed.
    pub data: Vec<u8>,
}

/// What became of one inbound datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Too short or RTCP; the cipher was never consulted.
    Discarded,
    Audio(ReceivedAudio),
    Failed(CryptoError),
}

/// Decode an inbound datagram: filter, decrypt, strip the extension.
pub fn decode_inbound(packet: &[u8], cipher: &dyn PacketCipher) -> Inbound {
    if rtp::should_discard(packet) {
        return Inbound::Discarded;
    }
    let Some(header) = RtpHeader::parse(packet) else {
        return Inbound::Discarded;
    };
    let nonce = rtp::nonce(&packet[..RTP_HEADER_LEN]);
    let plain = match cipher.open(&nonce, &packet[RTP_HEADER_LEN..]) {
        Ok(plain) => plain,
        Err(err) => return Inbound::Failed(err),
    };
    let data = if header.has_extension() {
        match rtp::strip_extension(&plain) {
            Some(rest) => rest.to_vec(),
            None => return Inbound::Discarded,
        }
    } else {
        plain
    };
    Inbound::Audio(ReceivedAudio {
        ssrc: header.ssrc,
        sequence: header.sequence,
        timestamp: header.timestamp,
        data,
    })
}

/// Build an outgoing packet: header followed by the sealed frame.
pub fn encode_outbound(
    header: &RtpHeader,
    frame: &[u8],
    cipher: &dyn PacketCipher,
) -> Result<Vec<u8>, CryptoError> {
    let header = header.to_bytes();
    let sealed = cipher.seal(&rtp::nonce(&header), frame)?;
    let mut packet = Vec::with_capacity(RTP_HEADER_LEN + sealed.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&sealed);
    Ok(packet)
}

/// Send-side state reported by [`VoiceUdpHandle::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStatus {
    pub queued: usize,
    pub in_flight: bool,
}

impl SendStatus {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && !self.in_flight
    }
}

enum Command {
    Discover(oneshot::Sender<DiscoveredAddress>),
    StartConnection(Vec<u8>),
    SendAudio(Vec<u8>),
    SetBurst(bool),
    Status(oneshot::Sender<SendStatus>),
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketKind {
    Audio,
    Discovery,
}

enum IoEvent {
    Sent(PacketKind),
    SendFailed(PacketKind, io::Error),
    Received(Vec<u8>),
    ReadFailed(io::Error),
}

/// Command side of a running voice UDP task.
#[derive(Debug, Clone)]
pub struct VoiceUdpHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl VoiceUdpHandle {
    /// Ask the server for our external address. Held until the socket is up.
    pub async fn discover(&self) -> Result<DiscoveredAddress, VoiceError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Discover(reply))?;
        rx.await.map_err(|_| VoiceError::Closed)
    }

    /// Install the session key and start sending and receiving audio.
    pub fn start_connection(&self, secret_key: Vec<u8>) -> Result<(), VoiceError> {
        self.command(Command::StartConnection(secret_key))
    }

    /// Queue one Opus frame.
    pub fn send_audio(&self, frame: Vec<u8>) -> Result<(), VoiceError> {
        self.command(Command::SendAudio(frame))
    }

    pub fn set_burst(&self, enabled: bool) -> Result<(), VoiceError> {
        self.command(Command::SetBurst(enabled))
    }

    pub async fn status(&self) -> Result<SendStatus, VoiceError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Status(reply))?;
        rx.await.map_err(|_| VoiceError::Closed)
    }

    pub fn disconnect(&self) -> Result<(), VoiceError> {
        self.command(Command::Disconnect)
    }

    /// Resolves once the task has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    fn command(&self, command: Command) -> Result<(), VoiceError> {
        self.tx.send(command).map_err(|_| VoiceError::Closed)
    }
}

type SocketFuture = Pin<Box<dyn Future<Output = io::Result<Arc<dyn VoiceSocket>>> + Send>>;

/// Entry point for the voice UDP task.
#[derive(Debug)]
pub struct VoiceUdp;

impl VoiceUdp {
    /// Spawn the task. `socket` resolves to the connected socket; commands sent
    /// before then are held.
    pub fn spawn<F>(
        config: VoiceConfig,
        ssrc: u32,
        socket: F,
        events: mpsc::UnboundedSender<VoiceEvent>,
    ) -> VoiceUdpHandle
    where
        F: Future<Output = io::Result<Arc<dyn VoiceSocket>>> + Send + 'static,
    {
        Self::spawn_with_sequencer(config, ssrc, socket, events, RtpSequencer::new())
    }

    /// Like [`VoiceUdp::spawn`] with fixed starting RTP values.
    pub fn spawn_with_sequencer<F>(
        config: VoiceConfig,
        ssrc: u32,
        socket: F,
        events: mpsc::UnboundedSender<VoiceEvent>,
        sequencer: RtpSequencer,
    ) -> VoiceUdpHandle
    where
        F: Future<Output = io::Result<Arc<dyn VoiceSocket>>> + Send + 'static,
    {
        let (tx, commands) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let task = UdpTask {
            ssrc,
            phase: Phase::NoSocket,
            held: Vec::new(),
            queue: SendQueue::new(config),
            sequencer,
            commands,
            io_tx,
            io_rx,
            writer: None,
            workers: Vec::new(),
            events,
        };
        tokio::spawn(task.run(Box::pin(socket)));
        VoiceUdpHandle { tx }
    }
}

enum Phase {
    NoSocket,
    AwaitingDiscovery,
    AwaitingKey,
    Active(Box<dyn PacketCipher>),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::NoSocket => "no_socket",
            Phase::AwaitingDiscovery => "awaiting_discovery",
            Phase::AwaitingKey => "awaiting_key",
            Phase::Active(_) => "active",
        }
    }
}

struct UdpTask {
    ssrc: u32,
    phase: Phase,
    /// Discovery requests waiting for a reply, or for the socket.
    held: Vec<oneshot::Sender<DiscoveredAddress>>,
    queue: SendQueue,
    sequencer: RtpSequencer,
    commands: mpsc::UnboundedReceiver<Command>,
    io_tx: mpsc::UnboundedSender<IoEvent>,
    io_rx: mpsc::UnboundedReceiver<IoEvent>,
    writer: Option<mpsc::UnboundedSender<(PacketKind, Vec<u8>)>>,
    workers: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<VoiceEvent>,
}

impl UdpTask {
    async fn run(mut self, socket: SocketFuture) {
        let mut connecting = Some(socket);
        loop {
            tokio::select! {
                Some(result) = OptionFuture::from(connecting.as_mut()), if connecting.is_some() => {
                    connecting = None;
                    match result {
                        Ok(socket) => self.on_connected(socket),
                        Err(error) => {
                            tracing::warn!(%error, "voice udp connect failed");
                            break;
                        }
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.io_rx.recv() => {
                    if !self.on_io(event) {
                        break;
                    }
                }
            }
        }

        for worker in &self.workers {
            worker.abort();
        }
        // Dropping the cipher discards the session key.
        self.phase = Phase::NoSocket;
        tracing::info!(ssrc = self.ssrc, "voice udp disconnected");
        let _ = self.events.send(VoiceEvent::Disconnected);
    }

    fn on_connected(&mut self, socket: Arc<dyn VoiceSocket>) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        self.workers.push(tokio::spawn(write_loop(socket.clone(), writer_rx, self.io_tx.clone())));
        self.workers.push(tokio::spawn(read_loop(socket, self.io_tx.clone())));
        self.writer = Some(writer_tx);
        tracing::debug!(ssrc = self.ssrc, held = self.held.len(), "voice udp socket connected");

        if let Phase::NoSocket = self.phase {
            self.phase = Phase::AwaitingKey;
        }
        if !self.held.is_empty() {
            self.send_discovery();
        }
        self.pump();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Discover(reply) => {
                self.held.push(reply);
                if self.writer.is_some() {
                    self.send_discovery();
                }
            }
            Command::StartConnection(mut key) => {
                let cipher = SecretBox::new(&key);
                key.fill(0);
                match cipher {
                    Ok(cipher) => {
                        tracing::info!(ssrc = self.ssrc, from = self.phase.name(), "voice udp active");
                        self.phase = Phase::Active(Box::new(cipher));
                        let _ = self.events.send(VoiceEvent::Ready);
                        self.pump();
                    }
                    Err(error) => tracing::error!(%error, "unusable voice secret key"),
                }
            }
            Command::SendAudio(frame) => {
                if !matches!(self.phase, Phase::Active(_)) {
                    tracing::debug!(phase = self.phase.name(), "voice not active, dropping frame");
                    return;
                }
                if self.queue.push(frame).is_some() {
                    tracing::debug!("voice send queue full, dropped oldest frame");
                }
                self.pump();
            }
            Command::SetBurst(enabled) => {
                self.queue.set_burst(enabled);
                self.request_burst();
            }
            Command::Status(reply) => {
                let _ = reply.send(SendStatus {
                    queued: self.queue.len(),
                    in_flight: self.queue.in_flight(),
                });
            }
            Command::Disconnect => {}
        }
    }

    /// Returns `false` once the socket is gone.
    fn on_io(&mut self, event: IoEvent) -> bool {
        match event {
            IoEvent::Sent(PacketKind::Audio) => {
                self.queue.ack();
                self.pump();
            }
            IoEvent::Sent(PacketKind::Discovery) => {}
            IoEvent::SendFailed(kind, error) => {
                tracing::warn!(?kind, %error, "voice udp send failed");
                if kind == PacketKind::Audio {
                    self.queue.ack();
                    self.pump();
                }
            }
            IoEvent::Received(packet) => self.on_packet(&packet),
            IoEvent::ReadFailed(error) => {
                tracing::warn!(%error, "voice udp socket closed");
                return false;
            }
        }
        true
    }

    fn on_packet(&mut self, packet: &[u8]) {
        let awaiting = matches!(self.phase, Phase::AwaitingDiscovery);
        // Once active, a rediscovery reply arrives interleaved with audio.
        if awaiting || (!self.held.is_empty() && is_reply_for(packet, self.ssrc)) {
            match parse_discovery_reply(packet) {
                Some(address) => {
                    tracing::info!(address = %address.address, port = address.port, "ip discovery complete");
                    for reply in self.held.drain(..) {
                        let _ = reply.send(address.clone());
                    }
                    if awaiting {
                        self.phase = Phase::AwaitingKey;
                    }
                    return;
                }
                None if awaiting => {
                    tracing::debug!(len = packet.len(), "ignoring non-discovery packet");
                    return;
                }
                None => {}
            }
        }
        let Phase::Active(cipher) = &self.phase else { return };
        match decode_inbound(packet, cipher.as_ref()) {
            Inbound::Audio(audio) => {
                let _ = self.events.send(VoiceEvent::Audio(audio));
            }
            Inbound::Discarded => {}
            Inbound::Failed(error) => tracing::warn!(%error, len = packet.len(), "dropping voice packet"),
        }
    }

    fn send_discovery(&mut self) {
        let Some(writer) = &self.writer else { return };
        let _ = writer.send((PacketKind::Discovery, discovery_request(self.ssrc).to_vec()));
        if !matches!(self.phase, Phase::Active(_)) {
            self.phase = Phase::AwaitingDiscovery;
        }
    }

    /// Hand the next queued frame to the writer if nothing is in flight.
    fn pump(&mut self) {
        loop {
            let (Phase::Active(cipher), Some(writer)) = (&self.phase, &self.writer) else {
                return;
            };
            let Some(frame) = self.queue.next_to_send() else { break };
            let (sequence, timestamp) = self.sequencer.advance();
            let header = RtpHeader::opus(sequence, timestamp, self.ssrc);
            match encode_outbound(&header, &frame, cipher.as_ref()) {
                Ok(packet) => {
                    let _ = writer.send((PacketKind::Audio, packet));
                    break;
                }
                Err(error) => {
                    tracing::warn!(%error, sequence, "failed to seal voice frame");
                    self.queue.ack();
                }
            }
        }
        self.request_burst();
    }

    fn request_burst(&mut self) {
        if let Some(count) = self.queue.burst_request() {
            let _ = self.events.send(VoiceEvent::BurstRequest { count });
        }
    }
}

async fn write_loop(
    socket: Arc<dyn VoiceSocket>,
    mut packets: mpsc::UnboundedReceiver<(PacketKind, Vec<u8>)>,
    io: mpsc::UnboundedSender<IoEvent>,
) {
    while let Some((kind, packet)) = packets.recv().await {
        let event = match socket.send(&packet).await {
            Ok(_) => IoEvent::Sent(kind),
            Err(error) => IoEvent::SendFailed(kind, error),
        };
        if io.send(event).is_err() {
            break;
        }
    }
}

async fn read_loop(socket: Arc<dyn VoiceSocket>, io: mpsc::UnboundedSender<IoEvent>) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => {
                if io.send(IoEvent::Received(buf[..len].to_vec())).is_err() {
                    break;
                }
            }
            Err(error) => {
                let _ = io.send(IoEvent::ReadFailed(error));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::crypto::KEY_LEN;

    #[test]
    fn outbound_packet_decodes_back() {
        let cipher = SecretBox::new(&[3u8; KEY_LEN]).unwrap();
        let header = RtpHeader::opus(10, 9600, 77);
        let packet = encode_outbound(&header, b"frame-bytes", &cipher).unwrap();
        assert_eq!(&packet[..RTP_HEADER_LEN], &header.to_bytes());
        match decode_inbound(&packet, &cipher) {
            Inbound::Audio(audio) => {
                assert_eq!(audio.ssrc, 77);
                assert_eq!(audio.sequence, 10);
                assert_eq!(audio.timestamp, 9600);
                assert_eq!(audio.data, b"frame-bytes");
            }
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn extension_is_removed_after_decryption() {
        let cipher = SecretBox::new(&[5u8; KEY_LEN]).unwrap();
        let mut header = RtpHeader::opus(1, 2, 3);
        header.flags |= rtp::EXTENSION_FLAG;
        let payload = [0xBE, 0xDE, 0x00, 0x01, 9, 9, 9, 9, b'o', b'k'];
        let packet = encode_outbound(&header, &payload, &cipher).unwrap();
        match decode_inbound(&packet, &cipher) {
            Inbound::Audio(audio) => assert_eq!(audio.data, b"ok"),
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[test]
    fn tampered_packet_fails() {
        let cipher = SecretBox::new(&[5u8; KEY_LEN]).unwrap();
        let mut packet = encode_outbound(&RtpHeader::opus(1, 2, 3), b"abc", &cipher).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        assert_eq!(decode_inbound(&packet, &cipher), Inbound::Failed(CryptoError::Open));
    }

    #[test]
    fn status_idle() {
        assert!(SendStatus { queued: 0, in_flight: false }.is_idle());
        assert!(!SendStatus { queued: 0, in_flight: true }.is_idle());
    }
}
