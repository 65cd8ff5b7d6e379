//! Convenient re-exports for common cordwire types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    config::{BuildError, GatewayConfig, PipelineConfig, RetryMode, VoiceConfig},
    error::{ProtocolError, TransportError},
    gateway::{
        Dispatch, Gateway, GatewayError, GatewayEvent, GatewayFrame, GatewayHandle, StopReason,
        TungsteniteConnector,
    },
    jitter::Jitter,
    rate_limit::{Admission, BucketKey, BucketUpdate, RateLimiter},
    request::{route, Answer, Pipeline, Request, RequestFlow, Route, RouteTemplate},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper},
    voice::{
        TokioUdpConnector, VoiceError, VoiceEvent, VoiceHandle, VoiceServerInfo, VoiceSession,
    },
};
