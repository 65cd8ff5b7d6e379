use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::GatewayError;

/// Message written to the websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    Text(String),
    Close(u16),
}

/// Message read from the websocket. Pings, pongs and binary frames are not surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsInbound {
    Text(String),
    Close(Option<u16>),
}

pub type WsSink = Pin<Box<dyn Sink<WsOutbound, Error = GatewayError> + Send>>;
pub type WsStream = Pin<Box<dyn Stream<Item = Result<WsInbound, GatewayError>> + Send>>;

/// An upgraded websocket, split into its two halves.
pub struct WsConnection {
    pub sink: WsSink,
    pub stream: WsStream,
}

impl WsConnection {
    pub fn new(sink: WsSink, stream: WsStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

/// Opens websocket connections. Swapped for an in-memory fake in tests.
#[async_trait]
pub trait GatewayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WsConnection, GatewayError>;
}

/// `tokio-tungstenite` connector over TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl GatewayConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WsConnection, GatewayError> {
        let (socket, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        tracing::debug!(%url, status = %response.status(), "websocket upgraded");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| GatewayError::Socket(e.to_string()))
            .with(|out: WsOutbound| future::ready(Ok::<_, GatewayError>(to_message(out))));
        let stream = stream.filter_map(|msg| future::ready(from_message(msg)));
        Ok(WsConnection::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(out: WsOutbound) -> Message {
    match out {
        WsOutbound::Text(text) => Message::Text(text.into()),
        WsOutbound::Close(code) => {
            Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: "".into() }))
        }
    }
}

fn from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<WsInbound, GatewayError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(WsInbound::Text(text.as_str().to_owned()))),
        Ok(Message::Close(frame)) => Some(Ok(WsInbound::Close(frame.map(|f| u16::from(f.code))))),
        Ok(_) => None,
        Err(e) => Some(Err(GatewayError::Socket(e.to_string()))),
    }
}
