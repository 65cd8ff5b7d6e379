mod common;

use common::{json_reply, with_headers, ScriptedTransport};
use cordwire::config::{PipelineConfig, RetryMode};
use cordwire::error::TransportError;
use cordwire::rate_limit::{BucketUpdate, RateLimiter};
use cordwire::request::route::{CREATE_MESSAGE, GET_CHANNEL, TRIGGER_TYPING};
use cordwire::request::{Answer, HttpCall, HttpReply, Pipeline, Request};
use cordwire::sleeper::InstantSleeper;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn config(retry: RetryMode) -> PipelineConfig {
    PipelineConfig::builder()
        .base_url("https://api.test/v10")
        .token("secret-token")
        .max_allowed_wait(Duration::from_secs(2))
        .retry(retry)
        .build()
        .unwrap()
}

fn get_channel(id: &str) -> Request<Value, String> {
    Request::json(GET_CHANNEL.compile(&[("channel_id", id)]).unwrap(), id.to_string())
}

fn pipeline(retry: RetryMode, transport: ScriptedTransport) -> Pipeline<ScriptedTransport> {
    Pipeline::with_transport(config(retry), RateLimiter::spawn(), transport)
        .with_sleeper(Arc::new(InstantSleeper))
}

#[tokio::test(start_paused = true)]
async fn dropped_request_never_reaches_the_network() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = tower::service_fn(move |_call: HttpCall| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TransportError>(HttpReply::new(StatusCode::OK))
        }
    });
    let limiter = RateLimiter::spawn();
    let pipeline = Pipeline::with_transport(config(RetryMode::Disabled), limiter.clone(), transport);

    let request = get_channel("1");
    let update = BucketUpdate { remaining: 0, limit: 5, reset_in: Duration::from_secs(60) };
    limiter.observe(request.route().bucket(), update);

    let answer = pipeline.submit(request).await;
    assert!(answer.is_dropped());
    assert_eq!(answer.context(), "1");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retries_until_the_call_succeeds() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Connection("reset".into())),
        Err(TransportError::Connection("reset".into())),
        Ok(json_reply(StatusCode::OK, json!({"id": "7", "name": "general"}))),
    ]);
    let pipeline = pipeline(RetryMode::Unbounded, transport.clone());

    let answer = pipeline.submit(get_channel("7")).await;
    assert_eq!(transport.call_count(), 3);
    assert_eq!(answer.request().retries(), 2);
    match answer {
        Answer::Success { data, .. } => assert_eq!(data["name"], "general"),
        other => panic!("expected success, got {}", other.kind()),
    }
}

#[tokio::test]
async fn limited_retry_gives_up() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Connection("reset".into())),
        Err(TransportError::Connection("reset".into())),
    ]);
    let pipeline = pipeline(RetryMode::Limited(1), transport.clone());

    match pipeline.submit(get_channel("7")).await {
        Answer::Error { cause, request } => {
            assert!(cause.is_connection());
            assert_eq!(request.retries(), 1);
        }
        other => panic!("expected error, got {}", other.kind()),
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn retry_disabled_by_default() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::Connection("reset".into()))]);
    let pipeline = pipeline(RetryMode::Disabled, transport.clone());
    assert_eq!(pipeline.submit(get_channel("7")).await.kind(), "error");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn calls_carry_auth_and_url() {
    let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(StatusCode::NO_CONTENT))]);
    let pipeline = pipeline(RetryMode::Disabled, transport.clone());

    let route = CREATE_MESSAGE.compile(&[("channel_id", "42")]).unwrap();
    let request = Request::<(), ()>::empty(route, ()).with_json(&json!({"content": "hi"})).unwrap();
    assert_eq!(pipeline.submit(request).await.kind(), "no_content");

    let calls = transport.calls();
    let call = &calls[0];
    assert_eq!(call.method, Method::POST);
    assert_eq!(call.url, "https://api.test/v10/channels/42/messages");
    assert_eq!(call.headers[AUTHORIZATION], "Bot secret-token");
    assert!(call.headers.contains_key(USER_AGENT));
    assert_eq!(call.headers[CONTENT_TYPE], "application/json");
    let body: Value = serde_json::from_slice(call.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"content": "hi"}));
}

#[tokio::test]
async fn server_errors_become_error_answers() {
    let transport = ScriptedTransport::new(vec![Ok(json_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"message": "boom"}),
    ))]);
    let pipeline = pipeline(RetryMode::Disabled, transport);

    match pipeline.submit(get_channel("1")).await {
        Answer::Error { cause, .. } => {
            assert_eq!(cause.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        }
        other => panic!("expected error, got {}", other.kind()),
    }
}

#[tokio::test]
async fn undecodable_body_is_an_error() {
    let mut reply = HttpReply::new(StatusCode::OK);
    reply.body = b"not json".to_vec();
    let pipeline = pipeline(RetryMode::Disabled, ScriptedTransport::new(vec![Ok(reply)]));
    match pipeline.submit(get_channel("1")).await {
        Answer::Error { cause: TransportError::Decode(_), .. } => {}
        other => panic!("expected decode error, got {}", other.kind()),
    }
}

#[tokio::test]
async fn global_429_starts_a_cooldown() {
    let limited = with_headers(
        json_reply(StatusCode::TOO_MANY_REQUESTS, json!({"message": "slow down"})),
        &[("retry-after", "3"), ("x-ratelimit-global", "true")],
    );
    let pipeline = pipeline(RetryMode::Disabled, ScriptedTransport::new(vec![Ok(limited)]));

    match pipeline.submit(get_channel("1")).await {
        Answer::RateLimited { reset_in, global, .. } => {
            assert_eq!(reset_in, Duration::from_secs(3));
            assert!(global);
        }
        other => panic!("expected rate limited, got {}", other.kind()),
    }
    assert!(pipeline.limiter().global_cooldown_until().await.is_some());
}

#[tokio::test]
async fn bucket_429_exhausts_only_that_bucket() {
    let limited = with_headers(
        HttpReply::new(StatusCode::TOO_MANY_REQUESTS),
        &[("retry-after", "4"), ("x-ratelimit-limit", "5")],
    );
    let pipeline = pipeline(RetryMode::Disabled, ScriptedTransport::new(vec![Ok(limited)]));
    let request = get_channel("1");
    let bucket = request.route().bucket().clone();

    assert_eq!(pipeline.submit(request).await.kind(), "rate_limited");
    let snapshot = pipeline.limiter().snapshot(&bucket).await.expect("bucket recorded");
    assert_eq!(snapshot.remaining, 0);
    assert_eq!(snapshot.limit, 5);
    assert!(pipeline.limiter().global_cooldown_until().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn response_headers_hold_the_next_request() {
    let exhausted = with_headers(
        json_reply(StatusCode::OK, json!({})),
        &[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-reset-after", "1.5"),
        ],
    );
    let transport = ScriptedTransport::new(vec![Ok(exhausted)]);
    let pipeline = pipeline(RetryMode::Disabled, transport.clone());

    match pipeline.submit(get_channel("1")).await {
        Answer::Success { rate: Some(rate), .. } => assert_eq!(rate.remaining, 0),
        other => panic!("expected success with rate info, got {}", other.kind()),
    }

    let start = Instant::now();
    assert!(pipeline.submit(get_channel("2")).await.is_success());
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn request_after_a_429_waits_out_retry_after() {
    let limited = with_headers(
        HttpReply::new(StatusCode::TOO_MANY_REQUESTS),
        &[("retry-after", "1.5"), ("x-ratelimit-limit", "5")],
    );
    let transport = ScriptedTransport::new(vec![
        Ok(limited),
        Ok(json_reply(StatusCode::OK, json!({"id": "2"}))),
    ]);
    let pipeline = pipeline(RetryMode::Disabled, transport.clone());

    assert_eq!(pipeline.submit(get_channel("1")).await.kind(), "rate_limited");

    let start = Instant::now();
    match pipeline.submit(get_channel("2")).await {
        Answer::Success { data, .. } => assert_eq!(data["id"], "2"),
        other => panic!("expected success, got {}", other.kind()),
    }
    assert!(start.elapsed() >= Duration::from_millis(1500), "sent after {:?}", start.elapsed());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn parallelism_bounds_concurrent_calls() {
    let transport = ScriptedTransport::default().with_delay(Duration::from_millis(50));
    let config = PipelineConfig::builder().token("t").parallelism(2).build().unwrap();
    let pipeline = Pipeline::with_transport(config, RateLimiter::spawn(), transport.clone());

    let requests = (0..6).map(|i| {
        let channel = i.to_string();
        let route = TRIGGER_TYPING.compile(&[("channel_id", channel.as_str())]).unwrap();
        pipeline.submit(Request::<(), usize>::empty(route, i))
    });
    let answers = futures::future::join_all(requests).await;

    assert!(answers.iter().all(Answer::is_success));
    assert_eq!(transport.call_count(), 6);
    assert_eq!(transport.max_in_flight(), 2);
}

#[tokio::test]
async fn flow_answers_every_request_and_retries_failures() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Connection("reset".into())),
        Ok(json_reply(StatusCode::OK, json!({"n": 1}))),
        Ok(json_reply(StatusCode::OK, json!({"n": 2}))),
        Ok(json_reply(StatusCode::OK, json!({"n": 3}))),
    ]);
    let pipeline = pipeline(RetryMode::Limited(2), transport.clone());
    let mut flow = pipeline.flow::<Value, String>(8);

    for id in ["a", "b", "c"] {
        flow.submit.send(get_channel(id)).await.unwrap();
    }
    drop(flow.submit);

    let mut contexts = Vec::new();
    while let Some(answer) = common::within("answer", flow.answers.recv()).await {
        assert!(answer.is_success(), "unexpected {}", answer.kind());
        contexts.push(answer.context().clone());
    }
    contexts.sort();
    assert_eq!(contexts, ["a", "b", "c"]);
    assert_eq!(transport.call_count(), 4);
}
