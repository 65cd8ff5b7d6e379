//! Resumable gateway websocket session.
//!
//! [`Gateway::spawn`] starts one task that owns the socket, the heartbeat and
//! the resume data. The caller drives it through a [`GatewayHandle`] and reads
//! [`GatewayEvent`]s, dispatches included, in wire order.
//!
//! Lost connections are reopened automatically. When the previous session is
//! still valid the new handshake resumes it, so the dispatch sequence carries
//! on where it stopped; otherwise the client identifies again and numbering
//! restarts.
//!
//! ```rust,no_run
//! use cordwire::config::GatewayConfig;
//! use cordwire::gateway::{Gateway, GatewayEvent, TungsteniteConnector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::builder().token("bot-token").intents(1 << 9).build()?;
//! let (handle, mut events) = Gateway::spawn(config, TungsteniteConnector);
//! handle.login()?;
//! while let Some(event) = events.recv().await {
//!     if let GatewayEvent::Dispatch(dispatch) = event {
//!         println!("{} #{:?}", dispatch.name, dispatch.sequence);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod connection;
pub mod frame;
mod session;
mod transport;

pub use connection::{Dispatch, Gateway, GatewayEvent, GatewayHandle, StopReason};
pub use frame::{GatewayFrame, OpCode};
pub use session::ResumeData;
pub use transport::{
    GatewayConnector, TungsteniteConnector, WsConnection, WsInbound, WsOutbound, WsSink, WsStream,
};

use crate::error::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Connecting or upgrading to a websocket failed.
    #[error("gateway connect failed: {0}")]
    Connect(String),
    #[error("gateway socket error: {0}")]
    Socket(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The gateway task is no longer running.
    #[error("gateway task has stopped")]
    Stopped,
}
