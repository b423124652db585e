//! Tests for the per-attempt log events, captured through tracing-subscriber.

use gridwire::retry::{SleepFuture, Sleeper};
use gridwire::Transport;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "ll352u9jujauoqz4gstvsae05";

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn matching(&self, level: &str, message: &str) -> Vec<String> {
        let prefix = format!("{} gridwire::transport:", level);
        self.lines()
            .into_iter()
            .filter(|line| line.contains(&prefix) && line.contains(message))
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Installs a capturing subscriber for the current thread.
fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

struct NoWait;

impl Sleeper for NoWait {
    fn sleep(&self, _delay: Duration) -> SleepFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn test_success_logs_one_info_line_and_a_truncated_debug_dump() {
    let (logs, _guard) = capture_logs();
    let mock_server = MockServer::start().await;

    let rows: Vec<_> = (0..20)
        .map(|i| json!({"id": i, "cells": [{"columnId": 1, "value": "row"}]}))
        .collect();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": rows})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = Transport::builder()
        .access_token(TOKEN)
        .unwrap()
        .truncate_len(Some(16))
        .build()
        .unwrap();

    let response = transport.get(mock_server.uri()).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);

    assert_eq!(logs.matching("INFO", "Received HTTP response").len(), 1);
    assert!(logs.matching("WARN", "").is_empty());

    let dumps = logs.matching("DEBUG", "HTTP exchange");
    assert_eq!(dumps.len(), 1);
    assert!(dumps[0].contains("...(truncated)"), "{}", dumps[0]);
    assert!(dumps[0].contains("Bearer ****ae05"), "{}", dumps[0]);
    assert!(!logs.lines().iter().any(|line| line.contains(TOKEN)));
}

#[tokio::test]
async fn test_failed_attempt_logs_full_redacted_dump_at_warn() {
    let (logs, _guard) = capture_logs();
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempt_count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).set_body_json(json!({
                    "errorCode": 4003,
                    "message": "Rate limit exceeded.",
                    "refId": "1nvyhpcz9s6yo"
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"data": []}))
            }
        })
        .mount(&mock_server)
        .await;

    let transport = Transport::builder()
        .access_token(TOKEN)
        .unwrap()
        .truncate_len(Some(8))
        .sleeper(Arc::new(NoWait))
        .build()
        .unwrap();

    let response = transport.get(mock_server.uri()).await.unwrap();
    assert_eq!(response.attempts, 2);

    assert_eq!(logs.matching("INFO", "Received HTTP response").len(), 2);

    let warnings = logs.matching("WARN", "HTTP request did not succeed");
    assert_eq!(warnings.len(), 1);
    let dump = &warnings[0];
    assert!(dump.contains("status=429"), "{}", dump);
    assert!(dump.contains("Bearer ****ae05"), "{}", dump);
    // the failure dump is never truncated
    assert!(dump.contains("Rate limit exceeded."), "{}", dump);
    assert!(!dump.contains("...(truncated)"), "{}", dump);
    assert!(!logs.lines().iter().any(|line| line.contains(TOKEN)));
}
