#![allow(dead_code)]

use async_trait::async_trait;
use cordwire::error::TransportError;
use cordwire::gateway::{GatewayConnector, GatewayError, WsConnection, WsInbound, WsOutbound};
use cordwire::request::{HttpCall, HttpReply};
use cordwire::voice::{UdpConnector, VoiceSocket};
use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Upper bound for any single wait in these tests.
pub const STEP: Duration = Duration::from_secs(5);

pub async fn within<F: std::future::Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(STEP, fut).await {
        Ok(out) => out,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

// ---------------------------------------------------------------------------
// HTTP

/// Scripted transport: answers calls from a queue, then falls back to `200 {}`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Result<HttpReply, TransportError>>>>,
    calls: Arc<Mutex<Vec<HttpCall>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Self {
        Self { replies: Arc::new(Mutex::new(replies.into())), ..Self::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<HttpCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl tower::Service<HttpCall> for ScriptedTransport {
    type Response = HttpReply;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<HttpReply, TransportError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: HttpCall) -> Self::Future {
        self.calls.lock().unwrap().push(call);
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok(json_reply(StatusCode::OK, json!({}))));
        let delay = self.delay;
        let in_flight = self.in_flight.clone();
        let max_in_flight = self.max_in_flight.clone();
        Box::pin(async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            reply
        })
    }
}

pub fn json_reply(status: StatusCode, body: Value) -> HttpReply {
    let mut reply = HttpReply::new(status);
    reply.body = body.to_string().into_bytes();
    reply
}

pub fn with_headers(mut reply: HttpReply, pairs: &[(&'static str, &'static str)]) -> HttpReply {
    for (name, value) in pairs {
        reply.headers.insert(*name, HeaderValue::from_static(value));
    }
    reply
}

// ---------------------------------------------------------------------------
// Websocket

/// Server side of one fake websocket connection.
pub struct FakeServer {
    pub url: String,
    outbound: fmpsc::UnboundedReceiver<WsOutbound>,
    inbound: fmpsc::UnboundedSender<Result<WsInbound, GatewayError>>,
}

impl FakeServer {
    /// Next message the client wrote.
    pub async fn next_outbound(&mut self) -> WsOutbound {
        within("client frame", self.outbound.next()).await.expect("client hung up")
    }

    /// Next text frame the client wrote, as JSON.
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.next_outbound().await {
                WsOutbound::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsOutbound::Close(code) => panic!("expected text, client closed with {code}"),
            }
        }
    }

    pub fn send_json(&self, value: Value) {
        self.inbound.unbounded_send(Ok(WsInbound::Text(value.to_string()))).unwrap();
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send_json(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}));
    }

    pub fn dispatch(&self, seq: u64, name: &str, data: Value) {
        self.send_json(json!({"op": 0, "s": seq, "t": name, "d": data}));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.unbounded_send(Ok(WsInbound::Close(Some(code))));
    }
}

/// Hands out in-memory websocket connections and reports each one as a
/// [`FakeServer`]. Connection attempts can be scripted to fail.
#[derive(Clone)]
pub struct FakeConnector {
    rejections: Arc<Mutex<VecDeque<bool>>>,
    urls: Arc<Mutex<Vec<String>>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            rejections: Arc::new(Mutex::new(VecDeque::new())),
            urls: Arc::new(Mutex::new(Vec::new())),
            servers,
        };
        (connector, rx)
    }

    /// The next `count` attempts fail.
    pub fn reject_next(&self, count: usize) {
        let mut rejections = self.rejections.lock().unwrap();
        rejections.extend(std::iter::repeat(true).take(count));
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<WsConnection, GatewayError> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.rejections.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(GatewayError::Connect("upgrade rejected".into()));
        }
        let (out_tx, out_rx) = fmpsc::unbounded();
        let (in_tx, in_rx) = fmpsc::unbounded();
        let _ = self.servers.send(FakeServer { url: url.to_string(), outbound: out_rx, inbound: in_tx });
        let sink = out_tx.sink_map_err(|_| GatewayError::Socket("server gone".into()));
        Ok(WsConnection::new(Box::pin(sink), Box::pin(in_rx)))
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
    within("connection", servers.recv()).await.expect("connector dropped")
}

// ---------------------------------------------------------------------------
// UDP

/// In-memory connected datagram socket.
pub struct FakeSocket {
    sent: mpsc::UnboundedSender<Vec<u8>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>>,
    gate: Option<Arc<Semaphore>>,
}

/// Test side of a [`FakeSocket`].
pub struct SocketRemote {
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
    pub inbound: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    gate: Option<Arc<Semaphore>>,
}

impl SocketRemote {
    /// Let `count` blocked writes complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub async fn next_sent(&mut self) -> Vec<u8> {
        within("datagram", self.sent.recv()).await.expect("socket dropped")
    }

    pub fn deliver(&self, packet: Vec<u8>) {
        self.inbound.send(Ok(packet)).unwrap();
    }

    pub fn fail_reads(&self) {
        let _ = self.inbound.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone")));
    }
}

/// A fake socket. With `gated`, every write blocks until [`SocketRemote::release`].
pub fn fake_socket(gated: bool) -> (Arc<FakeSocket>, SocketRemote) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let gate = gated.then(|| Arc::new(Semaphore::new(0)));
    let socket = FakeSocket { sent: sent_tx, inbound: tokio::sync::Mutex::new(in_rx), gate: gate.clone() };
    (Arc::new(socket), SocketRemote { sent: sent_rx, inbound: in_tx, gate })
}

#[async_trait]
impl VoiceSocket for FakeSocket {
    async fn send(&self, packet: &[u8]) -> io::Result<usize> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| io::Error::other("gate closed"))?.forget();
        }
        self.sent.send(packet.to_vec()).map_err(|_| io::Error::other("remote dropped"))?;
        Ok(packet.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Ok(packet)) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            Some(Err(err)) => Err(err),
            None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "remote dropped")),
        }
    }
}

/// Connector handing out fake sockets; each connect is reported with its
/// target address.
#[derive(Clone)]
pub struct FakeUdpConnector {
    remotes: mpsc::UnboundedSender<(String, u16, SocketRemote)>,
}

impl FakeUdpConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, u16, SocketRemote)>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (Self { remotes }, rx)
    }
}

#[async_trait]
impl UdpConnector for FakeUdpConnector {
    async fn connect(&self, address: &str, port: u16) -> io::Result<Arc<dyn VoiceSocket>> {
        let (socket, remote) = fake_socket(false);
        let _ = self.remotes.send((address.to_string(), port, remote));
        Ok(socket)
    }
}

/// A 70-byte discovery reply for `address:port`.
pub fn discovery_reply(ssrc: u32, address: &str, port: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 70];
    packet[..4].copy_from_slice(&ssrc.to_be_bytes());
    packet[4..4 + address.len()].copy_from_slice(address.as_bytes());
    packet[68..70].copy_from_slice(&port.to_le_bytes());
    packet
}

// ---------------------------------------------------------------------------
// Log capture

#[derive(Clone, Default)]
pub struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture everything logged on this thread until the guard drops.
pub fn capture_logs() -> (SharedWriter, tracing::subscriber::DefaultGuard) {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .without_time()
        .finish();
    (writer, tracing::subscriber::set_default(subscriber))
}
