use futures::{SinkExt, StreamExt};
use serde_json::Value;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::frame::{GatewayFrame, Hello, Identify, OpCode, Ready, Resume, VoiceStateUpdate};
use super::session::Session;
use super::transport::{GatewayConnector, WsConnection, WsInbound, WsOutbound, WsSink};
use super::GatewayError;
use crate::config::GatewayConfig;
use crate::heartbeat::Heartbeat;
use crate::sleeper::{Sleeper, TokioSleeper};

/// How long a logout waits for the server to finish the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code for a clean logout. The server invalidates the session.
const CLOSE_NORMAL: u16 = 1000;
/// Close code used when we intend to resume.
const CLOSE_RESUMABLE: u16 = 4000;

/// A dispatch event, forwarded in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub sequence: Option<u64>,
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    LoggedOut,
    /// Unrecoverable close code, or too many consecutive connect failures.
    Fatal(String),
    /// Every handle was dropped.
    HandleDropped,
}

/// Everything the gateway reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Websocket upgraded; the handshake follows.
    Connected,
    Ready { session_id: String },
    Resumed,
    Dispatch(Dispatch),
    /// Connection lost; a new one is being opened.
    Reconnecting { resume: bool },
    ConnectFailed { attempt: u32, error: String },
    Stopped { reason: StopReason },
}

enum Command {
    Login,
    Logout,
    Send(GatewayFrame),
}

/// Cloneable command side of a running gateway.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl GatewayHandle {
    /// Open the connection. Ignored once active.
    pub fn login(&self) -> Result<(), GatewayError> {
        self.command(Command::Login)
    }

    /// Close the connection; the task stops once the socket finishes closing.
    pub fn logout(&self) -> Result<(), GatewayError> {
        self.command(Command::Logout)
    }

    /// Queue an outbound frame. Frames sent while disconnected are dropped.
    pub fn send(&self, frame: GatewayFrame) -> Result<(), GatewayError> {
        self.command(Command::Send(frame))
    }

    pub fn update_voice_state(&self, update: &VoiceStateUpdate) -> Result<(), GatewayError> {
        self.send(GatewayFrame::voice_state_update(update)?)
    }

    fn command(&self, command: Command) -> Result<(), GatewayError> {
        self.tx.send(command).map_err(|_| GatewayError::Stopped)
    }
}

/// Entry point for the gateway connection task.
#[derive(Debug)]
pub struct Gateway;

impl Gateway {
    /// Spawn an inactive gateway. Call [`GatewayHandle::login`] to connect.
    ///
    /// The event channel is unbounded: the connection task never waits on the
    /// consumer, so heartbeats keep their schedule while events pile up.
    pub fn spawn<C: GatewayConnector>(
        config: GatewayConfig,
        connector: C,
    ) -> (GatewayHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        Self::spawn_with(config, connector, Arc::new(TokioSleeper))
    }

    /// Like [`Gateway::spawn`] with a custom sleeper for reconnect backoff.
    pub fn spawn_with<C: GatewayConnector>(
        config: GatewayConfig,
        connector: C,
        sleeper: Arc<dyn Sleeper>,
    ) -> (GatewayHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, commands) = mpsc::unbounded_channel();
        // Unbounded: a full channel must not stall heartbeats.
        let (events, events_rx) = mpsc::unbounded_channel();
        let task = GatewayTask {
            config,
            connector,
            sleeper,
            commands,
            events,
            session: Session::default(),
        };
        tokio::spawn(task.run());
        (GatewayHandle { tx }, events_rx)
    }
}

/// How an active connection ended.
enum Outcome {
    Reconnect,
    Stop(StopReason),
}

/// What the frame handler wants the connection loop to do next.
enum Flow {
    Continue,
    Reconnect,
}

struct GatewayTask<C> {
    config: GatewayConfig,
    connector: C,
    sleeper: Arc<dyn Sleeper>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    session: Session,
}

impl<C: GatewayConnector> GatewayTask<C> {
    async fn run(mut self) {
        let reason = self.run_until_stopped().await;
        match &reason {
            StopReason::Fatal(why) => tracing::error!(reason = %why, "gateway stopped"),
            _ => tracing::info!(?reason, "gateway stopped"),
        }
        self.emit(GatewayEvent::Stopped { reason });
    }

    async fn run_until_stopped(&mut self) -> StopReason {
        loop {
            match self.commands.recv().await {
                Some(Command::Login) => break,
                Some(Command::Logout) => return StopReason::LoggedOut,
                Some(Command::Send(_)) => tracing::warn!("gateway inactive, dropping outbound frame"),
                None => return StopReason::HandleDropped,
            }
        }

        let mut failures = 0u32;
        loop {
            if failures > 0 {
                let delay = self.config.reconnect_delay(failures);
                if let Some(reason) = self.pause(delay).await {
                    return reason;
                }
            }

            let url = self.connect_url();
            tracing::info!(%url, attempt = failures + 1, "connecting to gateway");
            let connection = match self.connector.connect(&url).await {
                Ok(connection) => connection,
                Err(error) => {
                    failures += 1;
                    tracing::warn!(attempt = failures, %error, "gateway connect failed");
                    self.emit(GatewayEvent::ConnectFailed { attempt: failures, error: error.to_string() });
                    if failures >= self.config.max_connect_attempts() {
                        return StopReason::Fatal(format!(
                            "gave up after {failures} failed connection attempts: {error}"
                        ));
                    }
                    continue;
                }
            };

            failures = 0;
            self.emit(GatewayEvent::Connected);
            match self.serve(connection).await {
                Outcome::Stop(reason) => return reason,
                Outcome::Reconnect => {
                    let resume = self.session.resume_data().is_some();
                    tracing::warn!(resume, "gateway connection lost, reconnecting");
                    self.emit(GatewayEvent::Reconnecting { resume });
                }
            }
        }
    }

    /// Sleep between connect attempts while still honoring logout.
    async fn pause(&mut self, delay: Duration) -> Option<StopReason> {
        let mut sleep = self.sleeper.sleep(delay);
        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                command = self.commands.recv() => match command {
                    Some(Command::Logout) => return Some(StopReason::LoggedOut),
                    Some(Command::Login) => {}
                    Some(Command::Send(_)) => tracing::warn!("gateway reconnecting, dropping outbound frame"),
                    None => return Some(StopReason::HandleDropped),
                },
            }
        }
    }

    fn connect_url(&self) -> String {
        let base = self
            .session
            .resume_data()
            .and_then(|data| data.resume_url)
            .unwrap_or_else(|| self.config.url().to_string());
        self.config.endpoint(&base)
    }

    async fn serve(&mut self, connection: WsConnection) -> Outcome {
        let WsConnection { mut sink, mut stream } = connection;
        let mut heartbeat = Heartbeat::default();
        let mut closing: Option<(Instant, StopReason)> = None;

        loop {
            let close_deadline = closing.as_ref().map(|(deadline, _)| *deadline);
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(WsInbound::Text(text))) => {
                        if let Flow::Reconnect = self.on_frame(&text, &mut sink, &mut heartbeat).await {
                            if closing.is_none() {
                                return Outcome::Reconnect;
                            }
                        }
                    }
                    Some(Ok(WsInbound::Close(code))) => {
                        if let Some((_, reason)) = closing {
                            return Outcome::Stop(reason);
                        }
                        return self.on_close(code);
                    }
                    Some(Err(error)) => {
                        if let Some((_, reason)) = closing {
                            return Outcome::Stop(reason);
                        }
                        tracing::warn!(%error, "gateway stream error");
                        return Outcome::Reconnect;
                    }
                    None => {
                        if let Some((_, reason)) = closing {
                            return Outcome::Stop(reason);
                        }
                        tracing::warn!("gateway stream ended");
                        return Outcome::Reconnect;
                    }
                },
                _ = heartbeat.tick() => {
                    if !heartbeat.beat() {
                        tracing::warn!("no heartbeat ack since last beat, connection is a zombie");
                        let _ = sink.send(WsOutbound::Close(CLOSE_RESUMABLE)).await;
                        return Outcome::Reconnect;
                    }
                    if send_frame(&mut sink, &GatewayFrame::heartbeat(self.session.sequence())).await.is_err() {
                        return Outcome::Reconnect;
                    }
                },
                command = self.commands.recv(), if closing.is_none() => {
                    let reason = match command {
                        Some(Command::Login) => continue,
                        Some(Command::Send(frame)) => {
                            if send_frame(&mut sink, &frame).await.is_err() {
                                return Outcome::Reconnect;
                            }
                            continue;
                        }
                        Some(Command::Logout) => StopReason::LoggedOut,
                        None => StopReason::HandleDropped,
                    };
                    tracing::info!("closing gateway connection");
                    if sink.send(WsOutbound::Close(CLOSE_NORMAL)).await.is_err() {
                        return Outcome::Stop(reason);
                    }
                    // A deliberate close ends the session server-side.
                    self.session.invalidate();
                    closing = Some((Instant::now() + CLOSE_TIMEOUT, reason));
                },
                _ = sleep_until_opt(close_deadline), if closing.is_some() => {
                    tracing::warn!("server did not finish closing in time");
                    if let Some((_, reason)) = closing {
                        return Outcome::Stop(reason);
                    }
                },
            }
        }
    }

    async fn on_frame(&mut self, text: &str, sink: &mut WsSink, heartbeat: &mut Heartbeat) -> Flow {
        let frame = match GatewayFrame::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "dropping malformed gateway frame");
                return Flow::Continue;
            }
        };
        let op = match frame.opcode() {
            Ok(op) => op,
            Err(error) => {
                tracing::debug!(%error, "ignoring gateway frame");
                return Flow::Continue;
            }
        };

        match op {
            OpCode::Hello => {
                let hello: Hello = match frame.payload() {
                    Ok(hello) => hello,
                    Err(error) => {
                        tracing::warn!(%error, "bad hello, reconnecting");
                        return Flow::Reconnect;
                    }
                };
                if let Err(error) = heartbeat.start(Duration::from_millis(hello.heartbeat_interval)) {
                    tracing::warn!(%error, interval_ms = hello.heartbeat_interval, "unusable hello, reconnecting");
                    return Flow::Reconnect;
                }
                tracing::debug!(interval_ms = hello.heartbeat_interval, "gateway hello");
                let handshake = self.handshake_frame();
                match handshake {
                    Ok(frame) if send_frame(sink, &frame).await.is_ok() => Flow::Continue,
                    Ok(_) => Flow::Reconnect,
                    Err(error) => {
                        tracing::warn!(%error, "failed to build handshake");
                        Flow::Reconnect
                    }
                }
            }
            OpCode::HeartbeatAck => {
                heartbeat.ack();
                Flow::Continue
            }
            OpCode::Heartbeat => {
                if send_frame(sink, &GatewayFrame::heartbeat(self.session.sequence())).await.is_err() {
                    return Flow::Reconnect;
                }
                Flow::Continue
            }
            OpCode::Dispatch => {
                self.on_dispatch(frame);
                Flow::Continue
            }
            OpCode::Reconnect => {
                tracing::info!("server requested reconnect");
                let _ = sink.send(WsOutbound::Close(CLOSE_RESUMABLE)).await;
                Flow::Reconnect
            }
            OpCode::InvalidSession => {
                let resumable = frame.d.as_bool().unwrap_or(false);
                tracing::warn!(resumable, "invalid session");
                if !resumable {
                    self.session.invalidate();
                }
                let _ = sink.send(WsOutbound::Close(CLOSE_RESUMABLE)).await;
                Flow::Reconnect
            }
            other => {
                tracing::debug!(op = other.code(), "ignoring client-only opcode");
                Flow::Continue
            }
        }
    }

    fn handshake_frame(&self) -> Result<GatewayFrame, crate::error::ProtocolError> {
        match self.session.resume_data() {
            Some(data) => {
                tracing::info!(session_id = %data.session_id, seq = ?data.sequence, "resuming session");
                GatewayFrame::resume(&Resume {
                    token: self.config.token().to_string(),
                    session_id: data.session_id,
                    seq: data.sequence,
                })
            }
            None => {
                tracing::info!("identifying");
                GatewayFrame::identify(&Identify {
                    token: self.config.token().to_string(),
                    intents: self.config.intents(),
                    properties: self.config.properties().into(),
                })
            }
        }
    }

    fn on_dispatch(&mut self, frame: GatewayFrame) {
        if let Some(seq) = frame.s {
            self.session.record_sequence(seq);
        }
        let name = frame.t.unwrap_or_default();
        match name.as_str() {
            "READY" => match Ready::deserialize(&frame.d) {
                Ok(ready) => {
                    tracing::info!(session_id = %ready.session_id, "gateway ready");
                    let session_id = ready.session_id.clone();
                    self.session.on_ready(ready);
                    self.emit(GatewayEvent::Ready { session_id });
                }
                Err(error) => tracing::warn!(%error, "READY without a usable session"),
            },
            "RESUMED" => {
                tracing::info!(seq = ?self.session.sequence(), "session resumed");
                self.emit(GatewayEvent::Resumed);
            }
            _ => {}
        }
        self.emit(GatewayEvent::Dispatch(Dispatch { sequence: frame.s, name, data: frame.d }));
    }

    fn on_close(&mut self, code: Option<u16>) -> Outcome {
        match code.map(CloseAction::classify) {
            Some(CloseAction::Fatal) => Outcome::Stop(StopReason::Fatal(format!(
                "gateway closed with unrecoverable code {}",
                code.unwrap_or_default()
            ))),
            Some(CloseAction::Fresh) => {
                tracing::warn!(?code, "gateway closed, session cannot be resumed");
                self.session.invalidate();
                Outcome::Reconnect
            }
            Some(CloseAction::Resume) | None => {
                tracing::warn!(?code, "gateway closed");
                Outcome::Reconnect
            }
        }
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

/// What a server close code allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseAction {
    Resume,
    Fresh,
    Fatal,
}

impl CloseAction {
    fn classify(code: u16) -> Self {
        match code {
            // authentication failed, invalid shard, sharding required,
            // invalid API version, invalid or disallowed intents
            4004 | 4010 | 4011 | 4012 | 4013 | 4014 => Self::Fatal,
            // invalid seq, session timed out
            4007 | 4009 => Self::Fresh,
            _ => Self::Resume,
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &GatewayFrame) -> Result<(), GatewayError> {
    let text = frame.encode()?;
    tracing::trace!(op = frame.op, "sending gateway frame");
    sink.send(WsOutbound::Text(text)).await.map_err(|error| {
        tracing::warn!(%error, "gateway send failed");
        error
    })
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
