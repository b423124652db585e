//! Tests for transparent resends after dropped connections.

use bytes::Bytes;
use gridwire::config::TransportConfig;
use gridwire::engine::{
    AttemptOutcome, EngineFuture, HttpEngine, NetworkFailureKind, RawResponse, WireRequest,
};
use gridwire::retry::{SleepFuture, Sleeper};
use gridwire::{Error, Headers, Request, Transport};
use http::{Method, StatusCode};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Plays back a fixed list of outcomes and records every request it sees.
struct ScriptedEngine {
    script: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<WireRequest>>,
}

enum Step {
    Dropped(NetworkFailureKind),
    Respond(u16, serde_json::Value),
    Refused,
}

impl ScriptedEngine {
    fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn bodies(&self) -> Vec<Option<Bytes>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.body.clone())
            .collect()
    }
}

impl HttpEngine for ScriptedEngine {
    fn execute(&self, request: WireRequest) -> EngineFuture<'_> {
        self.seen.lock().unwrap().push(request);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Dropped(NetworkFailureKind::ConnectionClosed));

        let outcome = match step {
            Step::Dropped(kind) => AttemptOutcome::NetworkFailure {
                kind,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )),
            },
            Step::Respond(status, body) => {
                let mut headers = Headers::new();
                headers.insert("Content-Type", "application/json");
                AttemptOutcome::Completed(RawResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    reason: None,
                    headers,
                    body: Bytes::from(serde_json::to_vec(&body).unwrap()),
                })
            }
            Step::Refused => AttemptOutcome::Fatal(Error::Configuration(
                "engine refused the request".to_string(),
            )),
        };
        Box::pin(async move { outcome })
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
        self.delays.lock().unwrap().push(delay);
        Box::pin(async { Ok(()) })
    }
}

fn transport_with(engine: Arc<ScriptedEngine>, config: TransportConfig) -> Transport {
    Transport::builder()
        .config(config)
        .engine(engine)
        .sleeper(Arc::new(RecordingSleeper::default()))
        .build()
        .unwrap()
}

fn rows_request(method: Method) -> Request {
    Request::new(method, "https://api.example.com/2.0/sheets/42/rows")
        .unwrap()
        .with_json(&json!([{"id": 7, "cells": [{"columnId": 1, "value": "done"}]}]))
        .unwrap()
}

#[tokio::test]
async fn test_put_is_resent_after_dropped_connection() {
    let engine = ScriptedEngine::new([
        Step::Dropped(NetworkFailureKind::NotDelivered),
        Step::Respond(200, json!({"resultCode": 0})),
    ]);
    let transport = transport_with(engine.clone(), TransportConfig::default());

    let response = transport.execute(rows_request(Method::PUT)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.attempts, 2);
    assert_eq!(engine.calls(), 2);

    let bodies = engine.bodies();
    assert!(bodies[0].is_some());
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn test_post_not_delivered_is_raised() {
    let engine = ScriptedEngine::new([
        Step::Dropped(NetworkFailureKind::NotDelivered),
        Step::Respond(200, json!({"resultCode": 0})),
    ]);
    let transport = transport_with(engine.clone(), TransportConfig::default());

    let result = transport.execute(rows_request(Method::POST)).await;

    assert!(matches!(result, Err(Error::ConnectionDropped(_))));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_post_with_empty_response_is_resent() {
    let engine = ScriptedEngine::new([
        Step::Dropped(NetworkFailureKind::ConnectionClosed),
        Step::Respond(200, json!({"resultCode": 0})),
    ]);
    let transport = transport_with(engine.clone(), TransportConfig::default());

    let response = transport.execute(rows_request(Method::POST)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_post_empty_response_resend_can_be_disabled() {
    let engine = ScriptedEngine::new([Step::Dropped(NetworkFailureKind::ConnectionClosed)]);
    let config = TransportConfig::builder()
        .retry_post_on_empty_response(false)
        .build();
    let transport = transport_with(engine.clone(), config);

    let result = transport.execute(rows_request(Method::POST)).await;

    assert!(matches!(result, Err(Error::ConnectionDropped(_))));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_resends_are_capped() {
    // the script runs dry and every further attempt drops
    let engine = ScriptedEngine::new(Vec::new());
    let config = TransportConfig::builder().max_network_retries(2).build();
    let transport = transport_with(engine.clone(), config);

    let result = transport.get("https://api.example.com/2.0/sheets").await;

    assert!(matches!(result, Err(Error::ConnectionDropped(_))));
    assert_eq!(engine.calls(), 3);
}

#[tokio::test]
async fn test_fatal_outcome_is_not_retried() {
    let engine = ScriptedEngine::new([Step::Refused]);
    let transport = transport_with(engine.clone(), TransportConfig::default());

    let result = transport.get("https://api.example.com/2.0/sheets").await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_resend_does_not_advance_backoff() {
    let engine = ScriptedEngine::new([
        Step::Dropped(NetworkFailureKind::ConnectionClosed),
        Step::Respond(429, json!({"errorCode": 4003, "message": "Rate limit exceeded."})),
        Step::Respond(200, json!({"data": []})),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let transport = Transport::builder()
        .engine(engine.clone())
        .sleeper(sleeper.clone())
        .retry_policy(Arc::new(gridwire::retry::ExponentialBackoff { jitter: false }))
        .build()
        .unwrap();

    let response = transport
        .get("https://api.example.com/2.0/sheets")
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.attempts, 3);
    assert_eq!(*sleeper.delays.lock().unwrap(), vec![Duration::from_secs(2)]);
}

/// Reads one request head off `stream`.
async fn read_request_head(stream: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn test_connection_closed_by_server_is_resent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // first connection: read the request and hang up without answering
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_head(&mut stream).await;
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_head(&mut stream).await;
        let body = r#"{"id":42,"name":"Budget"}"#;
        let response = format!(
            concat!(
                "HTTP/1.1 200 OK\r\n",
                "Content-Type: application/json\r\n",
                "Content-Length: {}\r\n",
                "Connection: close\r\n\r\n{}"
            ),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let transport = Transport::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let response = transport
        .get(format!("http://{}/2.0/sheets/42", addr))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.attempts, 2);
    assert!(response.text().contains("Budget"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_observed_reason_phrase_is_kept() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_head(&mut stream).await;
        let body = "back soon";
        let response = format!(
            concat!(
                "HTTP/1.1 503 Down For Maintenance\r\n",
                "Content-Type: text/plain\r\n",
                "Content-Length: {}\r\n",
                "Connection: close\r\n\r\n{}"
            ),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let transport = Transport::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let response = transport
        .get(format!("http://{}/2.0/sheets/42", addr))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.status_text, "Down For Maintenance");
    assert_eq!(response.attempts, 1);
    server.await.unwrap();
}
