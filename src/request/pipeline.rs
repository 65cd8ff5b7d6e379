use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tower::{Service, ServiceExt};

use super::{Answer, HttpCall, HttpReply, ReqwestTransport, Request};
use crate::config::PipelineConfig;
use crate::error::TransportError;
use crate::rate_limit::{Admission, BucketKey, BucketUpdate, RateLimitHeaders, RateLimiter, Ticket};
use crate::sleeper::{Sleeper, TokioSleeper};

/// Rate-limited HTTP pipeline.
///
/// Every request passes the limiter, then takes one of `parallelism` permits for
/// the actual call. Response headers flow back into the limiter before the
/// answer is returned; the feedback is a non-blocking message to the limiter task.
pub struct Pipeline<S = ReqwestTransport> {
    limiter: RateLimiter,
    service: S,
    permits: Arc<Semaphore>,
    config: Arc<PipelineConfig>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: Clone> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            service: self.service.clone(),
            permits: self.permits.clone(),
            config: self.config.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<S> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl Pipeline<ReqwestTransport> {
    /// Pipeline over a real HTTP client.
    pub fn new(config: PipelineConfig, limiter: RateLimiter) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, limiter, transport))
    }
}

impl<S> Pipeline<S>
where
    S: Service<HttpCall, Response = HttpReply, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    pub fn with_transport(config: PipelineConfig, limiter: RateLimiter, service: S) -> Self {
        Self {
            limiter,
            service,
            permits: Arc::new(Semaphore::new(config.parallelism())),
            config: Arc::new(config),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one attempt, ignoring the retry mode.
    pub async fn execute<T, C>(&self, request: Request<T, C>) -> Answer<T, C> {
        let ticket = self.limiter.reserve(request.route().bucket());
        self.dispatch(ticket, request).await
    }

    /// Run a request to completion under the configured retry mode.
    ///
    /// Failed attempts go back through the limiter like fresh requests.
    pub async fn submit<T, C>(&self, request: Request<T, C>) -> Answer<T, C> {
        let mut request = request;
        loop {
            match self.execute(request).await {
                Answer::Error { cause, request: failed } => match self.retry_or_deliver(cause, failed).await {
                    Ok(next) => request = next,
                    Err(answer) => return answer,
                },
                answer => return answer,
            }
        }
    }

    /// Start a long-lived request stream.
    ///
    /// Requests sent on the returned flow are admitted in submission order per
    /// bucket; answers arrive as they complete. Retries are merged back in ahead
    /// of new submissions. The driver stops once the submit side is dropped and
    /// every accepted request has been answered.
    pub fn flow<T, C>(&self, buffer: usize) -> RequestFlow<T, C>
    where
        T: Send + 'static,
        C: Send + 'static,
    {
        let (submit_tx, submit_rx) = mpsc::channel(buffer.max(1));
        let (answer_tx, answer_rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(self.clone().drive(submit_rx, answer_tx));
        RequestFlow { submit: submit_tx, answers: answer_rx }
    }

    async fn drive<T, C>(
        self,
        mut submit_rx: mpsc::Receiver<Request<T, C>>,
        answer_tx: mpsc::Sender<Answer<T, C>>,
    ) where
        T: Send + 'static,
        C: Send + 'static,
    {
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let mut open = true;
        let mut in_flight = 0usize;

        loop {
            if !open && in_flight == 0 {
                break;
            }
            tokio::select! {
                biased;
                Some(feedback) = feedback_rx.recv() => match feedback {
                    Feedback::Retry(request) => self.start(request, &feedback_tx, &answer_tx),
                    Feedback::Done => in_flight -= 1,
                },
                request = submit_rx.recv(), if open => match request {
                    Some(request) => {
                        in_flight += 1;
                        self.start(request, &feedback_tx, &answer_tx);
                    }
                    None => open = false,
                },
            }
        }
        tracing::debug!("request flow finished");
    }

    fn start<T, C>(
        &self,
        request: Request<T, C>,
        feedback_tx: &mpsc::UnboundedSender<Feedback<T, C>>,
        answer_tx: &mpsc::Sender<Answer<T, C>>,
    ) where
        T: Send + 'static,
        C: Send + 'static,
    {
        // Queue position is taken here, before spawning, so per-bucket order
        // matches submission order.
        let ticket = self.limiter.reserve(request.route().bucket());
        let pipeline = self.clone();
        let feedback_tx = feedback_tx.clone();
        let answer_tx = answer_tx.clone();
        tokio::spawn(async move {
            let answer = match pipeline.dispatch(ticket, request).await {
                Answer::Error { cause, request } => match pipeline.retry_or_deliver(cause, request).await {
                    Ok(retry) => {
                        let _ = feedback_tx.send(Feedback::Retry(retry));
                        return;
                    }
                    Err(answer) => answer,
                },
                answer => answer,
            };
            if answer_tx.send(answer).await.is_err() {
                tracing::debug!("answer receiver dropped");
            }
            let _ = feedback_tx.send(Feedback::Done);
        });
    }

    /// `Ok` with the request to resubmit after the retry delay, or `Err` with
    /// the final answer.
    async fn retry_or_deliver<T, C>(
        &self,
        cause: TransportError,
        request: Request<T, C>,
    ) -> Result<Request<T, C>, Answer<T, C>> {
        if !self.config.retry().allows(request.retries()) {
            return Err(Answer::Error { cause, request });
        }
        let request = request.retried();
        let delay = self.config.retry_delay(request.retries());
        tracing::warn!(
            route = %request.route(),
            attempt = request.retries(),
            ?delay,
            error = %cause,
            "request failed, retrying"
        );
        self.sleeper.sleep(delay).await;
        Ok(request)
    }

    async fn dispatch<T, C>(&self, ticket: Ticket, request: Request<T, C>) -> Answer<T, C> {
        if ticket.wait(self.config.max_allowed_wait()).await == Admission::Dropped {
            tracing::debug!(route = %request.route(), "request dropped before sending");
            return Answer::Dropped { request };
        }

        let call = self.prepare(&request);

        let reply = {
            let Ok(_permit) = self.permits.acquire().await else {
                let cause = TransportError::Connection("pipeline closed".into());
                return Answer::Error { cause, request };
            };
            tracing::debug!(route = %request.route(), attempt = request.retries(), "sending request");
            self.service.clone().oneshot(call).await
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(cause) => {
                tracing::debug!(route = %request.route(), error = %cause, "request failed");
                return Answer::Error { cause, request };
            }
        };

        let headers = RateLimitHeaders::from_headers(&reply.headers);
        self.feed_back(request.route().bucket(), reply.status, &headers);
        parse(request, reply, headers)
    }

    fn prepare<T, C>(&self, request: &Request<T, C>) -> HttpCall {
        let route = request.route();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.config.authorization().clone());
        headers.insert(USER_AGENT, self.config.user_agent().clone());
        if request.body().is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        HttpCall {
            method: route.method().clone(),
            url: format!("{}{}", self.config.base_url(), route.path()),
            headers,
            body: request.body().map(<[u8]>::to_vec),
        }
    }

    fn feed_back(&self, bucket: &BucketKey, status: StatusCode, headers: &RateLimitHeaders) {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_in = headers.retry_delay();
            if headers.global {
                self.limiter.trigger_global_cooldown(reset_in);
            } else {
                tracing::debug!(bucket = %bucket, ?reset_in, "bucket rate limited");
                let update = BucketUpdate { remaining: 0, limit: headers.limit.unwrap_or(0), reset_in };
                self.limiter.observe(bucket, update);
            }
        } else if let Some(update) = headers.bucket_update() {
            self.limiter.observe(bucket, update);
        }
    }
}

enum Feedback<T, C> {
    Retry(Request<T, C>),
    Done,
}

fn parse<T, C>(request: Request<T, C>, reply: HttpReply, headers: RateLimitHeaders) -> Answer<T, C> {
    let rate = headers.bucket_update();
    match reply.status {
        StatusCode::TOO_MANY_REQUESTS => Answer::RateLimited {
            reset_in: headers.retry_delay(),
            global: headers.global,
            limit: headers.limit,
            request,
        },
        StatusCode::NO_CONTENT => Answer::NoContent { rate, request },
        status if !status.is_success() => {
            let body = String::from_utf8_lossy(&reply.body).into_owned();
            Answer::Error { cause: TransportError::Status { status, body }, request }
        }
        _ => match request.decode(&reply.body) {
            Ok(data) => Answer::Success { data, rate, request },
            Err(cause) => Answer::Error { cause, request },
        },
    }
}

/// Submit side and answer side of a running [`Pipeline::flow`].
#[derive(Debug)]
pub struct RequestFlow<T, C> {
    pub submit: mpsc::Sender<Request<T, C>>,
    pub answers: mpsc::Receiver<Answer<T, C>>,
}
