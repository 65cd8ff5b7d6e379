//! HTTP request pipeline.
//!
//! A [`Request`] names a [`Route`], carries an optional body, an opaque caller
//! context, and a decoder. [`Pipeline`] runs it through the shared
//! [`RateLimiter`](crate::rate_limit::RateLimiter), a bounded pool of concurrent
//! calls, and hands back exactly one [`Answer`]. Failures never surface as `Err`.
//!
//! ```rust,no_run
//! use cordwire::config::PipelineConfig;
//! use cordwire::rate_limit::RateLimiter;
//! use cordwire::request::{route, Pipeline, Request};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::builder().token("bot-token").build()?;
//! let pipeline = Pipeline::new(config, RateLimiter::spawn())?;
//!
//! let route = route::CREATE_MESSAGE.compile(&[("channel_id", "1234")])?;
//! let request = Request::<serde_json::Value, _>::json(route, "greeting")
//!     .with_json(&serde_json::json!({ "content": "hello" }))?;
//! let answer = pipeline.submit(request).await;
//! println!("{}: {}", answer.context(), answer.kind());
//! # Ok(())
//! # }
//! ```

mod answer;
mod pipeline;
pub mod route;
mod transport;

pub use answer::{Answer, Decoder, Request};
pub use pipeline::{Pipeline, RequestFlow};
pub use route::{Route, RouteError, RouteTemplate};
pub use transport::{HttpCall, HttpReply, ReqwestTransport};
