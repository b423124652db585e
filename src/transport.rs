//! The resilient request transport.
//!
//! [`Transport::execute`] runs one logical call as a sequence of network
//! attempts. Every attempt is logged and, when enabled, traced. A response
//! with status 200 ends the call; any other response is offered to the
//! [`Retrier`], and a connection dropped before a response arrived is resent
//! transparently when that is safe for the method.

use crate::config::TransportConfig;
use crate::engine::{
    AttemptOutcome, HttpEngine, NetworkFailureKind, RawResponse, ReqwestEngine, WireRequest,
};
use crate::payload::ErrorDecoder;
use crate::retry::{Retrier, RetryPolicy, Sleeper};
use crate::snapshot::BodySnapshot;
use crate::trace::{Exchange, TraceFields, TraceRecord, TraceRecorder, TraceSink};
use crate::{Body, Error, Headers, Request, Response, Result};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executes requests with error-code driven retries and request tracing.
///
/// A transport is meant to be built once and shared: clones are cheap and
/// use the same connection pool.
///
/// # Examples
///
/// ```no_run
/// use gridwire::{Request, Transport};
/// use gridwire::config::TransportConfig;
/// use http::Method;
///
/// # async fn example() -> Result<(), gridwire::Error> {
/// let transport = Transport::builder()
///     .config(TransportConfig::from_env()?)
///     .access_token("ll352u9jujauoqz4gstvsae05")?
///     .build()?;
///
/// let request = Request::new(Method::PUT, "https://api.example.com/2.0/sheets/42/rows")?
///     .with_json(&serde_json::json!([{"id": 7, "cells": [{"columnId": 1, "value": "done"}]}]))?;
///
/// let response = transport.execute(request).await?;
/// println!("{} after {} attempts", response.status, response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

#[derive(Clone)]
struct TransportInner {
    engine: Arc<dyn HttpEngine>,
    default_headers: Headers,
    retrier: Retrier,
    tracer: TraceRecorder,
    config: TransportConfig,
}

impl Transport {
    /// Creates a new `TransportBuilder` with default settings.
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Returns a transport that shares this one's engine and connection pool
    /// but traces `fields` instead.
    pub fn with_trace_fields(&self, fields: TraceFields) -> Transport {
        let mut inner = (*self.inner).clone();
        inner.tracer = inner.tracer.with_fields(fields.clone());
        inner.config.trace_fields = fields;
        Transport {
            inner: Arc::new(inner),
        }
    }

    /// Returns a transport that shares this one's engine and connection pool
    /// but renders trace records compact or pretty.
    pub fn with_pretty_trace(&self, pretty: bool) -> Transport {
        let mut inner = (*self.inner).clone();
        inner.tracer = inner.tracer.with_pretty(pretty);
        inner.config.trace_pretty = pretty;
        Transport {
            inner: Arc::new(inner),
        }
    }

    /// Executes `request`, retrying transparently.
    ///
    /// Returns the response of the last attempt. That response has status
    /// 200 on success; otherwise it is the failing response the retry policy
    /// declined to retry, returned as-is.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingUri`] before any I/O if the request has no target.
    /// * [`Error::Body`] if a streamed body cannot be buffered.
    /// * [`Error::ConnectionDropped`] if the connection dropped and the
    ///   request could not be resent.
    /// * [`Error::Network`] or [`Error::Configuration`] for other faults.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let Request {
            method,
            uri,
            headers,
            mut body,
        } = request;
        let url = uri.ok_or(Error::MissingUri)?;

        // a failed attempt must be able to resend the same bytes
        if let Some(body) = body.as_mut() {
            if !body.is_repeatable() {
                body.make_repeatable().await.map_err(Error::Body)?;
            }
        }

        let mut wire_headers = self.inner.default_headers.clone();
        wire_headers.merge(&headers);
        let command = format!("{} {}", method, url);

        let started = Instant::now();
        let mut attempts = 0;
        let mut failed_responses = 0;
        let mut network_retries = 0;

        loop {
            attempts += 1;

            let request_snapshot = body
                .as_ref()
                .and_then(|body| BodySnapshot::of_buffered(body, &wire_headers));
            if let Some(body) = body.as_mut() {
                body.mark();
            }
            let wire = WireRequest {
                method: method.clone(),
                url: url.clone(),
                headers: wire_headers.clone(),
                body: body.as_mut().and_then(Body::take),
            };

            tracing::debug!(
                method = %method,
                url = %url,
                attempt = attempts,
                "Executing HTTP request"
            );

            let attempt_started = Instant::now();
            let outcome = self.inner.engine.execute(wire).await;
            let latency = attempt_started.elapsed();

            match outcome {
                AttemptOutcome::Completed(raw) => {
                    let response = build_response(raw, attempts, started.elapsed());
                    let response_snapshot = response
                        .body
                        .as_ref()
                        .and_then(|body| BodySnapshot::of_buffered(body, &response.headers));

                    self.observe(
                        &Exchange {
                            command: &command,
                            request_headers: &wire_headers,
                            request_body: request_snapshot.as_ref(),
                            status: &status_line(&response),
                            response_headers: &response.headers,
                            response_body: response_snapshot.as_ref(),
                        },
                        &response,
                        latency,
                    );

                    if response.status == StatusCode::OK {
                        return Ok(response);
                    }

                    failed_responses += 1;
                    if !self
                        .inner
                        .retrier
                        .should_retry(failed_responses, started.elapsed(), &response)
                        .await
                    {
                        return Ok(response);
                    }
                    rewind(body.as_mut());
                }
                AttemptOutcome::NetworkFailure { kind, source } => {
                    if !self.can_resend(&method, kind, body.as_ref()) {
                        tracing::error!(
                            method = %method,
                            url = %url,
                            attempt = attempts,
                            kind = ?kind,
                            error = %source,
                            "Connection dropped and request is not safe to resend"
                        );
                        return Err(Error::ConnectionDropped(source));
                    }
                    if network_retries >= self.inner.config.max_network_retries {
                        tracing::error!(
                            method = %method,
                            url = %url,
                            attempt = attempts,
                            resends = network_retries,
                            error = %source,
                            "Connection dropped too many times"
                        );
                        return Err(Error::ConnectionDropped(source));
                    }

                    network_retries += 1;
                    tracing::warn!(
                        method = %method,
                        url = %url,
                        attempt = attempts,
                        kind = ?kind,
                        error = %source,
                        "Connection dropped before response, resending"
                    );
                    rewind(body.as_mut());
                }
                AttemptOutcome::Fatal(error) => {
                    tracing::error!(
                        method = %method,
                        url = %url,
                        attempt = attempts,
                        error = %error,
                        "Request failed"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Makes a GET request.
    pub async fn get(&self, url: impl AsRef<str>) -> Result<Response> {
        self.execute(Request::new(Method::GET, url)?).await
    }

    /// Makes a DELETE request.
    pub async fn delete(&self, url: impl AsRef<str>) -> Result<Response> {
        self.execute(Request::new(Method::DELETE, url)?).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post_json<T>(&self, url: impl AsRef<str>, body: &T) -> Result<Response>
    where
        T: serde::Serialize + ?Sized,
    {
        self.execute(Request::new(Method::POST, url)?.with_json(body)?).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put_json<T>(&self, url: impl AsRef<str>, body: &T) -> Result<Response>
    where
        T: serde::Serialize + ?Sized,
    {
        self.execute(Request::new(Method::PUT, url)?.with_json(body)?).await
    }

    /// Logs one attempt and writes its trace record.
    fn observe(&self, exchange: &Exchange<'_>, response: &Response, latency: Duration) {
        tracing::info!(
            command = exchange.command,
            status = response.status.as_u16(),
            latency_ms = latency.as_millis(),
            elapsed_ms = response.elapsed.as_millis(),
            attempt = response.attempts,
            "Received HTTP response"
        );

        if response.status == StatusCode::OK {
            if tracing::enabled!(tracing::Level::DEBUG) {
                let dump = TraceRecord::build(
                    &TraceFields::summary(),
                    self.inner.config.truncate_len,
                    exchange,
                )
                .render(false);
                tracing::debug!(exchange = %dump, "HTTP exchange");
            }
        } else if tracing::enabled!(tracing::Level::WARN) {
            let dump = TraceRecord::build(&TraceFields::full(), None, exchange).render(false);
            tracing::warn!(
                status = response.status.as_u16(),
                exchange = %dump,
                "HTTP request did not succeed"
            );
        }

        self.inner.tracer.emit(exchange);
    }

    /// Returns `true` if a request whose connection dropped may be resent.
    fn can_resend(&self, method: &Method, kind: NetworkFailureKind, body: Option<&Body>) -> bool {
        if body.is_some_and(|body| !body.is_repeatable()) {
            return false;
        }
        if *method == Method::POST {
            return kind == NetworkFailureKind::ConnectionClosed
                && self.inner.config.retry_post_on_empty_response;
        }
        is_idempotent(method)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.inner.config)
            .field("retrier", &self.inner.retrier)
            .finish_non_exhaustive()
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

fn rewind(body: Option<&mut Body>) {
    if let Some(body) = body {
        body.reset();
    }
}

fn build_response(raw: RawResponse, attempts: usize, elapsed: Duration) -> Response {
    let RawResponse {
        status,
        reason,
        headers,
        body,
    } = raw;
    let body = (!body.is_empty()).then(|| {
        let content_type = headers.get(http::header::CONTENT_TYPE.as_str());
        Body::from_bytes(body, content_type)
    });
    let mut response = Response::new(status, headers, body);
    if let Some(reason) = reason {
        response.status_text = reason;
    }
    response.attempts = attempts;
    response.elapsed = elapsed;
    response
}

fn status_line(response: &Response) -> String {
    if response.status_text.is_empty() {
        response.status.as_u16().to_string()
    } else {
        format!("{} {}", response.status.as_u16(), response.status_text)
    }
}

/// Builder for configuring and creating a [`Transport`].
///
/// # Examples
///
/// ```no_run
/// use gridwire::Transport;
/// use gridwire::trace::TraceFields;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), gridwire::Error> {
/// let transport = Transport::builder()
///     .access_token("ll352u9jujauoqz4gstvsae05")?
///     .timeout(Duration::from_secs(60))
///     .max_retry_time(Duration::from_secs(30))
///     .trace_fields(TraceFields::parse("RequestSummary,ResponseSummary"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct TransportBuilder {
    config: TransportConfig,
    default_headers: Headers,
    user_agent: String,
    timeout: Option<Duration>,
    engine: Option<Arc<dyn HttpEngine>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    error_decoder: Option<Arc<dyn ErrorDecoder>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    trace_sink: Option<TraceSink>,
}

impl TransportBuilder {
    /// Creates a new `TransportBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            default_headers: Headers::new(),
            user_agent: format!("gridwire/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            engine: None,
            retry_policy: None,
            error_decoder: None,
            sleeper: None,
            trace_sink: None,
        }
    }

    /// Replaces the whole configuration.
    ///
    /// Call this before the individual setters below, which override fields
    /// of whatever configuration is current.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a header sent with every request. Request headers win on
    /// conflicting names.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        let value = value
            .to_str()
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        // keep the caller's spelling of the name for logs and traces
        self.default_headers.insert(name.as_ref(), value);
        Ok(self)
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value.
    pub fn access_token(self, token: impl AsRef<str>) -> Result<Self> {
        self.default_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// Sets the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the per-attempt timeout of the default engine.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry budget.
    pub fn max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.config.max_retry_time = max_retry_time;
        self
    }

    /// Sets the trace fields.
    pub fn trace_fields(mut self, fields: TraceFields) -> Self {
        self.config.trace_fields = fields;
        self
    }

    /// Sets whether trace records are pretty-printed.
    pub fn trace_pretty(mut self, pretty: bool) -> Self {
        self.config.trace_pretty = pretty;
        self
    }

    /// Sets the body summary length; `None` disables truncation.
    pub fn truncate_len(mut self, truncate_len: Option<usize>) -> Self {
        self.config.truncate_len = truncate_len;
        self
    }

    /// Writes trace records to `sink` instead of the configured output.
    pub fn trace_sink(mut self, sink: TraceSink) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// Uses a custom network engine.
    pub fn engine(mut self, engine: Arc<dyn HttpEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Uses a custom retry policy.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Uses a custom error payload decoder.
    pub fn error_decoder(mut self, decoder: Arc<dyn ErrorDecoder>) -> Self {
        self.error_decoder = Some(decoder);
        self
    }

    /// Uses a custom sleeper for backoff waits.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Builds the configured `Transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user agent is not a valid header value or the
    /// default engine cannot be created.
    pub fn build(self) -> Result<Transport> {
        let mut default_headers = Headers::new();
        default_headers.insert(http::header::USER_AGENT.as_str(), self.user_agent.as_str());
        default_headers.merge(&self.default_headers);
        // reject bad values here rather than on the first request
        default_headers.to_header_map()?;

        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(ReqwestEngine::new(None, self.timeout)?),
        };

        let mut retrier = Retrier::new(self.config.max_retry_time);
        if let Some(policy) = self.retry_policy {
            retrier = retrier.with_policy(policy);
        }
        if let Some(decoder) = self.error_decoder {
            retrier = retrier.with_decoder(decoder);
        }
        if let Some(sleeper) = self.sleeper {
            retrier = retrier.with_sleeper(sleeper);
        }

        let tracer = match self.trace_sink {
            Some(sink) => TraceRecorder::new(
                self.config.trace_fields.clone(),
                self.config.trace_pretty,
                self.config.truncate_len,
                sink,
            ),
            None => TraceRecorder::from_config(&self.config),
        };

        tracing::debug!(
            max_retry_time_ms = self.config.max_retry_time.as_millis(),
            trace_fields = %self.config.trace_fields,
            "Built transport"
        );

        Ok(Transport {
            inner: Arc::new(TransportInner {
                engine,
                default_headers,
                retrier,
                tracer,
                config: self.config,
            }),
        })
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
