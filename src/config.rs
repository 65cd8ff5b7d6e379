//! Validated configuration for the pipeline, gateway, and voice connection.
//!
//! Every config is produced by a builder whose `build()` checks invariants up front,
//! so the long-lived tasks never have to deal with nonsense values at runtime.
//!
//! ```rust
//! use std::time::Duration;
//! use cordwire::config::{PipelineConfig, RetryMode};
//!
//! let config = PipelineConfig::builder()
//!     .token("bot-token")
//!     .max_allowed_wait(Duration::from_secs(5))
//!     .parallelism(8)
//!     .retry(RetryMode::Limited(3))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.parallelism(), 8);
//! ```

use reqwest::header::HeaderValue;
use std::fmt;
use std::time::Duration;

use crate::{Backoff, Jitter};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
pub const DEFAULT_GATEWAY_VERSION: u8 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("cordwire/", env!("CARGO_PKG_VERSION"));

/// Errors produced while building a config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("a bot token is required")]
    MissingToken,
    #[error("token contains characters that are not valid in a header")]
    InvalidToken,
    #[error("user agent contains characters that are not valid in a header")]
    InvalidUserAgent,
    #[error("parallelism must be > 0 (got {0})")]
    InvalidParallelism(usize),
    #[error("max_allowed_wait must be > 0")]
    InvalidMaxWait,
    #[error("max_connect_attempts must be > 0")]
    InvalidConnectAttempts,
    #[error("max_queue must be > 0")]
    InvalidQueueDepth,
    #[error("burst settings must satisfy threshold <= max_burst <= max_queue (got {threshold}, {max_burst}, {max_queue})")]
    InvalidBurst { threshold: usize, max_burst: usize, max_queue: usize },
}

/// What the pipeline does with `Error` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Hand every answer to the caller as-is.
    #[default]
    Disabled,
    /// Resubmit failed requests until one succeeds.
    Unbounded,
    /// Resubmit at most this many times.
    Limited(u32),
}

impl RetryMode {
    /// Whether a request that has already been retried `retries` times may go again.
    pub fn allows(&self, retries: u32) -> bool {
        match self {
            RetryMode::Disabled => false,
            RetryMode::Unbounded => true,
            RetryMode::Limited(max) => retries < *max,
        }
    }
}

/// Settings for [`Pipeline`](crate::request::Pipeline).
#[derive(Clone)]
pub struct PipelineConfig {
    base_url: String,
    authorization: HeaderValue,
    user_agent: HeaderValue,
    max_allowed_wait: Duration,
    parallelism: usize,
    retry: RetryMode,
    retry_backoff: Backoff,
    retry_jitter: Jitter,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("base_url", &self.base_url)
            .field("authorization", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("max_allowed_wait", &self.max_allowed_wait)
            .field("parallelism", &self.parallelism)
            .field("retry", &self.retry)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authorization(&self) -> &HeaderValue {
        &self.authorization
    }

    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    /// Longest time a request may be held by the rate limiter before it is dropped.
    pub fn max_allowed_wait(&self) -> Duration {
        self.max_allowed_wait
    }

    /// Maximum concurrent HTTP calls.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn retry(&self) -> RetryMode {
        self.retry
    }

    /// Delay before retry number `retries` (1-based).
    pub fn retry_delay(&self, retries: u32) -> Duration {
        self.retry_jitter.apply(self.retry_backoff.delay(retries))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    base_url: String,
    token: Option<String>,
    user_agent: String,
    max_allowed_wait: Duration,
    parallelism: usize,
    retry: RetryMode,
    retry_backoff: Backoff,
    retry_jitter: Jitter,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            token: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_allowed_wait: Duration::from_secs(2 * 60),
            parallelism: 8,
            retry: RetryMode::Disabled,
            retry_backoff: Backoff::exponential(Duration::from_millis(250))
                .with_max(Duration::from_secs(10))
                .unwrap_or_else(|_| Backoff::constant(Duration::from_millis(250))),
            retry_jitter: Jitter::Full,
        }
    }
}

impl PipelineConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bot token, sent as `Authorization: Bot <token>`.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn max_allowed_wait(mut self, wait: Duration) -> Self {
        self.max_allowed_wait = wait;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn retry(mut self, retry: RetryMode) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_backoff(mut self, backoff: Backoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn retry_jitter(mut self, jitter: Jitter) -> Self {
        self.retry_jitter = jitter;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, BuildError> {
        let token = self.token.filter(|t| !t.is_empty()).ok_or(BuildError::MissingToken)?;
        let mut authorization = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| BuildError::InvalidToken)?;
        authorization.set_sensitive(true);
        let user_agent =
            HeaderValue::from_str(&self.user_agent).map_err(|_| BuildError::InvalidUserAgent)?;
        if self.parallelism == 0 {
            return Err(BuildError::InvalidParallelism(0));
        }
        if self.max_allowed_wait.is_zero() {
            return Err(BuildError::InvalidMaxWait);
        }
        Ok(PipelineConfig {
            base_url: self.base_url,
            authorization,
            user_agent,
            max_allowed_wait: self.max_allowed_wait,
            parallelism: self.parallelism,
            retry: self.retry,
            retry_backoff: self.retry_backoff,
            retry_jitter: self.retry_jitter,
        })
    }
}

/// Client properties reported in the gateway identify payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "cordwire".to_string(),
            device: "cordwire".to_string(),
        }
    }
}

/// Settings for [`Gateway`](crate::gateway::Gateway).
#[derive(Clone)]
pub struct GatewayConfig {
    url: String,
    version: u8,
    token: String,
    intents: u64,
    properties: ClientProperties,
    reconnect_backoff: Backoff,
    jitter: Jitter,
    max_connect_attempts: u32,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("version", &self.version)
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .finish()
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Versioned, JSON-encoded endpoint for `base`.
    pub fn endpoint(&self, base: &str) -> String {
        format!("{}/?v={}&encoding=json", base.trim_end_matches('/'), self.version)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn intents(&self) -> u64 {
        self.intents
    }

    pub fn properties(&self) -> &ClientProperties {
        &self.properties
    }

    /// Delay before reconnect attempt after `failures` consecutive failures.
    pub fn reconnect_delay(&self, failures: u32) -> std::time::Duration {
        self.jitter.apply(self.reconnect_backoff.delay(failures))
    }

    /// Consecutive failed connects tolerated before the gateway gives up.
    pub fn max_connect_attempts(&self) -> u32 {
        self.max_connect_attempts
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfigBuilder {
    url: String,
    version: u8,
    token: Option<String>,
    intents: u64,
    properties: ClientProperties,
    reconnect_backoff: Backoff,
    jitter: Jitter,
    max_connect_attempts: u32,
}

impl Default for GatewayConfigBuilder {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            version: DEFAULT_GATEWAY_VERSION,
            token: None,
            intents: 0,
            properties: ClientProperties::default(),
            reconnect_backoff: Backoff::exponential(Duration::from_secs(1))
                .with_max(Duration::from_secs(60))
                .unwrap_or_else(|_| Backoff::constant(Duration::from_secs(1))),
            jitter: Jitter::Full,
            max_connect_attempts: 8,
        }
    }
}

impl GatewayConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn properties(mut self, properties: ClientProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn build(self) -> Result<GatewayConfig, BuildError> {
        let token = self.token.filter(|t| !t.is_empty()).ok_or(BuildError::MissingToken)?;
        if self.max_connect_attempts == 0 {
            return Err(BuildError::InvalidConnectAttempts);
        }
        Ok(GatewayConfig {
            url: self.url,
            version: self.version,
            token,
            intents: self.intents,
            properties: self.properties,
            reconnect_backoff: self.reconnect_backoff,
            jitter: self.jitter,
            max_connect_attempts: self.max_connect_attempts,
        })
    }
}

/// Flow-control settings for the voice send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceConfig {
    max_queue: usize,
    send_request_threshold: usize,
    max_burst: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self { max_queue: 32, send_request_threshold: 8, max_burst: 16 }
    }
}

impl VoiceConfig {
    pub fn new(
        max_queue: usize,
        send_request_threshold: usize,
        max_burst: usize,
    ) -> Result<Self, BuildError> {
        if max_queue == 0 {
            return Err(BuildError::InvalidQueueDepth);
        }
        if send_request_threshold > max_burst || max_burst > max_queue {
            return Err(BuildError::InvalidBurst {
                threshold: send_request_threshold,
                max_burst,
                max_queue,
            });
        }
        Ok(Self { max_queue, send_request_threshold, max_burst })
    }

    /// Queued frames beyond this push out the oldest.
    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    /// Queue depth under which burst mode asks for more frames.
    pub fn send_request_threshold(&self) -> usize {
        self.send_request_threshold
    }

    /// Queue depth a burst request tries to fill up to.
    pub fn max_burst(&self) -> usize {
        self.max_burst
    }
}
