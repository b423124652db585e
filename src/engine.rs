//! The network engine underneath the transport.
//!
//! An [`HttpEngine`] performs exactly one network attempt and reports how it
//! ended as an [`AttemptOutcome`]. The transport decides what to do next by
//! matching on that outcome. [`ReqwestEngine`] is the default engine; it
//! shares one connection pool between every call of a transport.

use crate::{Error, Headers};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

/// Boxed error carried by [`AttemptOutcome::NetworkFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`HttpEngine::execute`].
pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = AttemptOutcome> + Send + 'a>>;

/// The request as it goes on the wire: final headers, fixed-length body.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute target URL.
    pub url: Url,
    /// Default headers merged with the request's own.
    pub headers: Headers,
    /// The body bytes, sent with a `Content-Length`.
    pub body: Option<Bytes>,
}

/// A response read completely off the wire.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The reason phrase from the status line when it differs from the
    /// canonical one.
    pub reason: Option<String>,
    /// Headers as received.
    pub headers: Headers,
    /// The full body; empty when the server sent none.
    pub body: Bytes,
}

/// How a connection failed without producing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailureKind {
    /// The server closed the connection before sending any response bytes.
    ConnectionClosed,
    /// The request was never written to the connection.
    NotDelivered,
}

/// The result of one network attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response, of any status, was received.
    Completed(RawResponse),
    /// The connection failed in a way that may be safe to retry.
    NetworkFailure {
        /// What happened.
        kind: NetworkFailureKind,
        /// The underlying error.
        source: BoxError,
    },
    /// The attempt failed and must not be retried.
    Fatal(Error),
}

/// Executes single network attempts.
///
/// Implementations must be safe to share between concurrent calls.
pub trait HttpEngine: Send + Sync {
    /// Sends `request` once and reads the whole response.
    fn execute(&self, request: WireRequest) -> EngineFuture<'_>;
}

/// An [`HttpEngine`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestEngine {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestEngine {
    /// Builds an engine with its own connection pool.
    ///
    /// Responses are transparently decompressed; the negotiated headers are
    /// what [`RawResponse::headers`] reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(user_agent: Option<&str>, timeout: Option<Duration>) -> crate::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder.build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client, timeout })
    }

    /// Wraps an existing client, sharing its pool.
    pub fn from_client(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }
}

impl HttpEngine for ReqwestEngine {
    fn execute(&self, request: WireRequest) -> EngineFuture<'_> {
        Box::pin(async move {
            let headers = match request.headers.to_header_map() {
                Ok(headers) => headers,
                Err(e) => return AttemptOutcome::Fatal(e),
            };

            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(headers);
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return classify_send_error(e),
            };

            let status = response.status();
            // hyper only records the phrase when it is not the canonical one
            let reason = response
                .extensions()
                .get::<hyper::ext::ReasonPhrase>()
                .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned());
            let headers = Headers::from_header_map(response.headers());
            // draining the body hands the connection back to the pool
            match response.bytes().await {
                Ok(body) => AttemptOutcome::Completed(RawResponse {
                    status,
                    reason,
                    headers,
                    body,
                }),
                Err(e) => AttemptOutcome::Fatal(Error::Network(e)),
            }
        })
    }
}

/// Sorts a failed send into a retryable network failure or a fatal error.
fn classify_send_error(error: reqwest::Error) -> AttemptOutcome {
    if error.is_builder() || error.is_connect() || error.is_timeout() || error.is_redirect() {
        return AttemptOutcome::Fatal(Error::Network(error));
    }
    match dropped_connection_kind(&error) {
        Some(kind) => AttemptOutcome::NetworkFailure {
            kind,
            source: Box::new(error),
        },
        None => AttemptOutcome::Fatal(Error::Network(error)),
    }
}

/// Walks the source chain looking for a connection that went away before a
/// response arrived.
pub(crate) fn dropped_connection_kind(
    error: &(dyn std::error::Error + 'static),
) -> Option<NetworkFailureKind> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(hyper_error) = err.downcast_ref::<hyper::Error>() {
            if hyper_error.is_incomplete_message() {
                return Some(NetworkFailureKind::ConnectionClosed);
            }
            if hyper_error.is_canceled() {
                return Some(NetworkFailureKind::NotDelivered);
            }
        }
        if let Some(io_error) = err.downcast_ref::<std::io::Error>() {
            match io_error.kind() {
                std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => {
                    return Some(NetworkFailureKind::ConnectionClosed)
                }
                std::io::ErrorKind::BrokenPipe => return Some(NetworkFailureKind::NotDelivered),
                _ => {}
            }
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "request failed")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_io_kinds_in_source_chain() {
        let reset = Wrapped(std::io::ErrorKind::ConnectionReset.into());
        assert_eq!(
            dropped_connection_kind(&reset),
            Some(NetworkFailureKind::ConnectionClosed)
        );

        let pipe = Wrapped(std::io::ErrorKind::BrokenPipe.into());
        assert_eq!(
            dropped_connection_kind(&pipe),
            Some(NetworkFailureKind::NotDelivered)
        );

        let refused = Wrapped(std::io::ErrorKind::ConnectionRefused.into());
        assert_eq!(dropped_connection_kind(&refused), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_fatal() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = ReqwestEngine::new(None, Some(Duration::from_secs(5))).unwrap();
        let outcome = engine
            .execute(WireRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{}/2.0/sheets", addr)).unwrap(),
                headers: Headers::new(),
                body: None,
            })
            .await;

        assert!(matches!(outcome, AttemptOutcome::Fatal(Error::Network(_))));
    }
}
