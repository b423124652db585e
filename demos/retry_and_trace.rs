//! Example demonstrating error-code retries and request tracing.
//!
//! This example shows how to:
//! - Load transport settings from `GRIDWIRE_*` environment variables
//! - Plug in a custom retry policy
//! - Trace every attempt to stdout with the token redacted
//! - Inspect the last response when the retry budget runs out
//!
//! It runs against a local mock server, so no network access is needed.
//!
//! Run with: `cargo run --example retry_and_trace`

use gridwire::config::TransportConfig;
use gridwire::retry::{RetryPolicy, RATE_LIMIT_EXCEEDED, SYSTEM_MAINTENANCE};
use gridwire::trace::TraceFields;
use gridwire::{Error, ErrorPayload, JsonErrorDecoder, Transport};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Custom policy: short linear waits, so the example finishes quickly
struct QuickLinear;

impl RetryPolicy for QuickLinear {
    fn calc_backoff(
        &self,
        attempt: usize,
        _elapsed: Duration,
        _payload: &ErrorPayload,
    ) -> Duration {
        Duration::from_millis(100 * attempt as u64)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("gridwire=info")
        .init();

    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    // Rate limited twice, then the sheet comes back
    Mock::given(method("GET"))
        .and(path("/2.0/sheets/42"))
        .respond_with(move |_req: &wiremock::Request| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(429).set_body_json(json!({
                    "errorCode": RATE_LIMIT_EXCEEDED,
                    "message": "Rate limit exceeded."
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "Budget"}))
            }
        })
        .mount(&server)
        .await;

    // Always in maintenance
    Mock::given(method("GET"))
        .and(path("/2.0/sheets/7"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "errorCode": SYSTEM_MAINTENANCE,
            "message": "Offline for system maintenance."
        })))
        .mount(&server)
        .await;

    println!("=== Example 1: Retry on rate limiting, with tracing ===");
    let transport = Transport::builder()
        .config(TransportConfig::from_env()?)
        .access_token("ll352u9jujauoqz4gstvsae05")?
        .retry_policy(Arc::new(QuickLinear))
        .trace_fields(TraceFields::parse("RequestHeaders,ResponseSummary"))
        .trace_pretty(false)
        .build()?;

    let response = transport
        .get(format!("{}/2.0/sheets/42", server.uri()))
        .await?;
    println!(
        "Got {} after {} attempts in {:?}",
        response.status, response.attempts, response.elapsed
    );
    println!("Body: {}", response.text());

    println!("\n=== Example 2: Budget exhausted ===");
    let quiet = Transport::builder()
        .retry_policy(Arc::new(QuickLinear))
        .max_retry_time(Duration::from_millis(500))
        .build()?;

    let response = quiet.get(format!("{}/2.0/sheets/7", server.uri())).await?;
    match response.error_payload(&JsonErrorDecoder) {
        Ok(payload) => println!(
            "Gave up after {} attempts: {} ({})",
            response.attempts, payload.message, payload.error_code
        ),
        Err(e) => println!("Gave up with an unreadable body: {}", e),
    }

    Ok(())
}
