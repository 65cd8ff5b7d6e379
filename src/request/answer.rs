use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::Route;
use crate::error::TransportError;
use crate::rate_limit::BucketUpdate;

/// Turns a response body into the caller's type.
pub type Decoder<T> = Arc<dyn Fn(&[u8]) -> Result<T, TransportError> + Send + Sync>;

/// One outgoing call. Immutable once built; the pipeline only ever moves it
/// into an [`Answer`] and back.
pub struct Request<T, C> {
    route: Route,
    body: Option<Vec<u8>>,
    context: C,
    decoder: Decoder<T>,
    retries: u32,
}

impl<T, C> Request<T, C> {
    pub fn new<F>(route: Route, context: C, decoder: F) -> Self
    where
        F: Fn(&[u8]) -> Result<T, TransportError> + Send + Sync + 'static,
    {
        Self { route, body: None, context, decoder: Arc::new(decoder), retries: 0 }
    }

    /// Attach a raw JSON body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `payload` as the JSON body.
    pub fn with_json<B: Serialize>(self, payload: &B) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(payload).map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(self.with_body(body))
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    /// How many times this request has been resubmitted after an error.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn decode(&self, body: &[u8]) -> Result<T, TransportError> {
        (self.decoder)(body)
    }

    pub(crate) fn retried(mut self) -> Self {
        self.retries += 1;
        self
    }
}

impl<T: DeserializeOwned, C> Request<T, C> {
    /// Request whose response body is JSON for `T`.
    pub fn json(route: Route, context: C) -> Self {
        Self::new(route, context, |body| {
            serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
        })
    }
}

impl<C> Request<(), C> {
    /// Request whose response body is ignored.
    pub fn empty(route: Route, context: C) -> Self {
        Self::new(route, context, |_| Ok(()))
    }
}

impl<T, C: fmt::Debug> fmt::Debug for Request<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("route", &self.route)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("context", &self.context)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Outcome of one request. Every variant hands the request back so the
/// caller gets its context regardless of what happened.
#[derive(Debug)]
pub enum Answer<T, C> {
    Success { data: T, rate: Option<BucketUpdate>, request: Request<T, C> },
    NoContent { rate: Option<BucketUpdate>, request: Request<T, C> },
    /// The server answered 429.
    RateLimited { reset_in: Duration, global: bool, limit: Option<u32>, request: Request<T, C> },
    /// The limiter held the request past `max_allowed_wait`; nothing was sent.
    Dropped { request: Request<T, C> },
    Error { cause: TransportError, request: Request<T, C> },
}

impl<T, C> Answer<T, C> {
    pub fn request(&self) -> &Request<T, C> {
        match self {
            Answer::Success { request, .. }
            | Answer::NoContent { request, .. }
            | Answer::RateLimited { request, .. }
            | Answer::Dropped { request }
            | Answer::Error { request, .. } => request,
        }
    }

    pub fn into_request(self) -> Request<T, C> {
        match self {
            Answer::Success { request, .. }
            | Answer::NoContent { request, .. }
            | Answer::RateLimited { request, .. }
            | Answer::Dropped { request }
            | Answer::Error { request, .. } => request,
        }
    }

    pub fn context(&self) -> &C {
        self.request().context()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Answer::Success { .. } | Answer::NoContent { .. })
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Answer::Dropped { .. })
    }

    /// The decoded body, if any.
    pub fn into_data(self) -> Option<T> {
        match self {
            Answer::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Answer::Success { .. } => "success",
            Answer::NoContent { .. } => "no_content",
            Answer::RateLimited { .. } => "rate_limited",
            Answer::Dropped { .. } => "dropped",
            Answer::Error { .. } => "error",
        }
    }
}
