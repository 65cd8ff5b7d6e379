use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use super::crypto::MODE_XSALSA20_POLY1305;
use super::discovery::DiscoveredAddress;
use super::protocol::{
    Identify, Ready, SelectProtocol, SelectProtocolData, SessionDescription, Speaking, VoiceMessage,
};
use super::udp::{UdpConnector, VoiceUdp, VoiceUdpHandle};
use super::{VoiceError, VoiceEvent};
use crate::config::VoiceConfig;
use crate::gateway::{GatewayConnector, WsInbound, WsOutbound, WsSink, WsStream};
use crate::heartbeat::Heartbeat;

pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Speaking flag for ordinary microphone audio.
const SPEAKING_MICROPHONE: u32 = 1;

/// Connection details handed out by the main gateway (voice state and voice
/// server updates).
#[derive(Clone)]
pub struct VoiceServerInfo {
    pub endpoint: String,
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

impl std::fmt::Debug for VoiceServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceServerInfo")
            .field("endpoint", &self.endpoint)
            .field("server_id", &self.server_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl VoiceServerInfo {
    pub fn url(&self) -> String {
        let host = self
            .endpoint
            .trim_start_matches("wss://")
            .trim_start_matches("ws://")
            .trim_end_matches('/');
        format!("wss://{host}/?v={VOICE_GATEWAY_VERSION}")
    }
}

enum Command {
    SendAudio(Vec<u8>),
    SetBurst(bool),
    Disconnect,
}

/// Command side of a voice connection.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl VoiceHandle {
    /// Queue one Opus frame. Dropped unless the connection is active.
    pub fn send_audio(&self, frame: Vec<u8>) -> Result<(), VoiceError> {
        self.command(Command::SendAudio(frame))
    }

    /// Turn burst requests on or off.
    pub fn set_burst(&self, enabled: bool) -> Result<(), VoiceError> {
        self.command(Command::SetBurst(enabled))
    }

    pub fn disconnect(&self) -> Result<(), VoiceError> {
        self.command(Command::Disconnect)
    }

    fn command(&self, command: Command) -> Result<(), VoiceError> {
        self.tx.send(command).map_err(|_| VoiceError::Closed)
    }
}

/// Voice control session: drives the websocket handshake and owns the UDP task.
#[derive(Debug)]
pub struct VoiceSession;

impl VoiceSession {
    /// Open the control socket and start the handshake. Events, audio included,
    /// arrive on the returned receiver; `Disconnected` is always the last one.
    pub async fn connect<W, U>(
        info: VoiceServerInfo,
        config: VoiceConfig,
        ws: &W,
        udp: U,
    ) -> Result<(VoiceHandle, mpsc::UnboundedReceiver<VoiceEvent>), VoiceError>
    where
        W: GatewayConnector,
        U: UdpConnector,
    {
        let url = info.url();
        let connection = ws.connect(&url).await.map_err(|e| VoiceError::Connect(e.to_string()))?;
        tracing::info!(%url, server_id = %info.server_id, "voice control socket connected");

        let (tx, commands) = mpsc::unbounded_channel();
        // Unbounded: a full channel must not stall heartbeats.
        let (events, events_rx) = mpsc::unbounded_channel();
        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();
        let task = SessionTask {
            info,
            config,
            udp_connector: Arc::new(udp),
            sink: connection.sink,
            stream: connection.stream,
            commands,
            events,
            discovered_tx,
            discovered_rx,
            udp: None,
            ssrc: None,
            heartbeat: Heartbeat::default(),
        };
        tokio::spawn(task.run());
        Ok((VoiceHandle { tx }, events_rx))
    }
}

struct SessionTask<U> {
    info: VoiceServerInfo,
    config: VoiceConfig,
    udp_connector: Arc<U>,
    sink: WsSink,
    stream: WsStream,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    discovered_tx: mpsc::UnboundedSender<Result<DiscoveredAddress, VoiceError>>,
    discovered_rx: mpsc::UnboundedReceiver<Result<DiscoveredAddress, VoiceError>>,
    udp: Option<VoiceUdpHandle>,
    ssrc: Option<u32>,
    heartbeat: Heartbeat,
}

impl<U: UdpConnector> SessionTask<U> {
    async fn run(mut self) {
        let identify = VoiceMessage::Identify(Identify {
            server_id: self.info.server_id.clone(),
            user_id: self.info.user_id.clone(),
            session_id: self.info.session_id.clone(),
            token: self.info.token.clone(),
        });
        if let Err(error) = self.send(&identify).await {
            tracing::warn!(%error, "voice identify failed");
        } else {
            self.serve().await;
        }

        let _ = self.sink.send(WsOutbound::Close(1000)).await;
        match self.udp.take() {
            // The UDP task reports its own disconnect.
            Some(udp) => {
                let _ = udp.disconnect();
            }
            None => {
                let _ = self.events.send(VoiceEvent::Disconnected);
            }
        }
        tracing::info!(server_id = %self.info.server_id, "voice session ended");
    }

    async fn serve(&mut self) {
        loop {
            tokio::select! {
                inbound = self.stream.next() => match inbound {
                    Some(Ok(WsInbound::Text(text))) => {
                        if let Err(error) = self.on_message(&text).await {
                            tracing::warn!(%error, "voice control error");
                            return;
                        }
                    }
                    Some(Ok(WsInbound::Close(code))) => {
                        tracing::info!(?code, "voice control socket closed");
                        return;
                    }
                    Some(Err(error)) => {
                        tracing::warn!(%error, "voice control socket failed");
                        return;
                    }
                    None => return,
                },
                _ = self.heartbeat.tick() => {
                    if !self.heartbeat.beat() {
                        tracing::warn!("voice heartbeat not acknowledged");
                        return;
                    }
                    if self.send(&VoiceMessage::Heartbeat(heartbeat_nonce())).await.is_err() {
                        return;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::SendAudio(frame)) => match &self.udp {
                        Some(udp) => {
                            let _ = udp.send_audio(frame);
                        }
                        None => tracing::debug!("voice udp not ready, dropping frame"),
                    },
                    Some(Command::SetBurst(enabled)) => {
                        if let Some(udp) = &self.udp {
                            let _ = udp.set_burst(enabled);
                        }
                    }
                    Some(Command::Disconnect) | None => return,
                },
                Some(found) = self.discovered_rx.recv() => {
                    let address = match found {
                        Ok(address) => address,
                        Err(error) => {
                            tracing::warn!(%error, "ip discovery failed");
                            return;
                        }
                    };
                    let select = VoiceMessage::SelectProtocol(SelectProtocol {
                        protocol: "udp".to_string(),
                        data: SelectProtocolData {
                            address: address.address,
                            port: address.port,
                            mode: MODE_XSALSA20_POLY1305.to_string(),
                        },
                    });
                    if self.send(&select).await.is_err() {
                        return;
                    }
                },
                _ = udp_closed(&self.udp), if self.udp.is_some() => {
                    tracing::warn!("voice udp stopped, ending session");
                    return;
                },
            }
        }
    }

    async fn on_message(&mut self, text: &str) -> Result<(), VoiceError> {
        let message = match VoiceMessage::from_json(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%error, "ignoring voice control frame");
                return Ok(());
            }
        };
        match message {
            VoiceMessage::Hello(hello) => {
                let period = Duration::try_from_secs_f64(hello.heartbeat_interval / 1000.0)
                    .map_err(|_| VoiceError::Handshake("invalid heartbeat interval".into()))?;
                tracing::debug!(?period, "voice hello");
                self.heartbeat
                    .start(period)
                    .map_err(|error| VoiceError::Handshake(error.to_string()))?;
            }
            VoiceMessage::Ready(ready) => self.on_ready(ready),
            VoiceMessage::SessionDescription(description) => self.on_session_description(description).await?,
            VoiceMessage::HeartbeatAck(_) => self.heartbeat.ack(),
            VoiceMessage::Speaking(speaking) => {
                let _ = self.events.send(VoiceEvent::Speaking {
                    user_id: speaking.user_id,
                    ssrc: speaking.ssrc,
                    speaking: speaking.speaking != 0,
                });
            }
            VoiceMessage::Resumed => tracing::debug!("voice session resumed"),
            other => tracing::trace!(op = other.opcode(), "ignoring voice control message"),
        }
        Ok(())
    }

    fn on_ready(&mut self, ready: Ready) {
        if !ready.modes.iter().any(|mode| mode == MODE_XSALSA20_POLY1305) {
            tracing::warn!(modes = ?ready.modes, "server did not offer {MODE_XSALSA20_POLY1305}");
        }
        tracing::info!(ssrc = ready.ssrc, ip = %ready.ip, port = ready.port, "voice ready");
        self.ssrc = Some(ready.ssrc);

        let connector = self.udp_connector.clone();
        let (ip, port) = (ready.ip, ready.port);
        let socket = async move { connector.connect(&ip, port).await };
        let udp = VoiceUdp::spawn(self.config, ready.ssrc, socket, self.events.clone());

        let discovering = udp.clone();
        let discovered = self.discovered_tx.clone();
        tokio::spawn(async move {
            let _ = discovered.send(discovering.discover().await);
        });
        self.udp = Some(udp);
    }

    async fn on_session_description(&mut self, description: SessionDescription) -> Result<(), VoiceError> {
        if description.mode != MODE_XSALSA20_POLY1305 {
            return Err(VoiceError::Handshake(format!("unsupported mode {}", description.mode)));
        }
        let udp = self.udp.as_ref().ok_or_else(|| VoiceError::Handshake("session description before ready".into()))?;
        udp.start_connection(description.secret_key)?;
        let speaking = VoiceMessage::Speaking(Speaking {
            speaking: SPEAKING_MICROPHONE,
            delay: Some(0),
            ssrc: self.ssrc,
            user_id: None,
        });
        self.send(&speaking).await
    }

    async fn send(&mut self, message: &VoiceMessage) -> Result<(), VoiceError> {
        let text = message.to_json()?;
        tracing::trace!(op = message.opcode(), "sending voice control message");
        self.sink
            .send(WsOutbound::Text(text))
            .await
            .map_err(|e| VoiceError::Connect(e.to_string()))
    }
}

async fn udp_closed(udp: &Option<VoiceUdpHandle>) {
    match udp {
        Some(udp) => udp.closed().await,
        None => std::future::pending().await,
    }
}

fn heartbeat_nonce() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
