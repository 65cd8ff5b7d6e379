#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # cordwire
//!
//! Client-side transport for a real-time chat platform: a rate-limited HTTP
//! request pipeline, a resumable gateway websocket, and encrypted voice over UDP.
//!
//! ## Features
//!
//! - **Rate limiting** driven by server headers, per bucket and global
//! - **Request pipeline** with bounded parallelism, typed answers, and opt-in retry
//! - **Gateway connection** with heartbeat, automatic reconnect, and session resume
//! - **Voice connection** with IP discovery, RTP framing, and secret-box encryption
//!
//! Each stateful piece runs as its own tokio task and is driven through a
//! cloneable handle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cordwire::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limiter = RateLimiter::spawn();
//!     let config = PipelineConfig::builder()
//!         .token("bot-token")
//!         .max_allowed_wait(Duration::from_secs(10))
//!         .retry(RetryMode::Limited(3))
//!         .build()?;
//!     let pipeline = Pipeline::new(config, limiter)?;
//!
//!     let route = route::GET_CHANNEL.compile(&[("channel_id", "1234")])?;
//!     match pipeline.submit(Request::<serde_json::Value, ()>::json(route, ())).await {
//!         Answer::Success { data, .. } => println!("{data}"),
//!         other => println!("request ended as {}", other.kind()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod gateway;
mod heartbeat;
pub mod jitter;
pub mod prelude;
pub mod rate_limit;
pub mod request;
pub mod sleeper;
pub mod voice;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use config::{BuildError, GatewayConfig, PipelineConfig, RetryMode, VoiceConfig};
pub use error::{ProtocolError, TransportError};
pub use gateway::{Gateway, GatewayError, GatewayEvent, GatewayHandle};
pub use jitter::Jitter;
pub use rate_limit::{Admission, BucketKey, RateLimiter};
pub use request::{Answer, Pipeline, Request};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use voice::{VoiceError, VoiceEvent, VoiceHandle, VoiceSession};
