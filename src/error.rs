//! Error types for transport calls.
//!
//! Only faults that abort a call are errors. A server that answers with a
//! failing status is not an error at this layer: the failing [`Response`]
//! is handed back to the caller with its status and body intact.
//!
//! [`Response`]: crate::Response

/// The main error type for transport calls.
///
/// # Examples
///
/// ```no_run
/// use gridwire::{Error, Request, Transport};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let transport = Transport::builder().build()?;
/// let request = Request::new(Method::GET, "https://api.example.com/2.0/sheets")?;
///
/// match transport.execute(request).await {
///     Ok(response) if response.is_success() => println!("{}", response.text()),
///     Ok(response) => eprintln!("server said {}", response.status),
///     Err(Error::Network(e)) => eprintln!("network failure: {}", e),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request had no target URI. Raised before any I/O.
    #[error("Request has no target URI")]
    MissingUri,

    /// A network-level error occurred that could not be retried transparently.
    ///
    /// This wraps the underlying `reqwest::Error` (connection refused, TLS
    /// failure, protocol violation, a dropped connection on a request that is
    /// not safe to resend, ...).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The connection went away before a response arrived and the request
    /// could not be resent, either because resending is unsafe for its
    /// method or because the resend cap was reached.
    #[error("Connection dropped before a response arrived: {0}")]
    ConnectionDropped(#[source] crate::engine::BoxError),

    /// The request body could not be drained into a re-readable buffer.
    #[error("Failed to buffer request body: {0}")]
    Body(#[source] std::io::Error),

    /// Invalid configuration was provided.
    ///
    /// This covers builder arguments (header names, values) as well as
    /// unparseable environment settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed to serialize a request body to JSON.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// Failed to decode a response body into the expected type.
    #[error("Failed to decode response: {message}")]
    Decode {
        /// The serde error message
        message: String,
        /// The raw response body that failed to decode
        raw_response: String,
    },

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if the error was raised before any network I/O.
    ///
    /// ```
    /// use gridwire::Error;
    ///
    /// assert!(Error::MissingUri.is_caller_error());
    /// assert!(!Error::ConnectionDropped("connection reset".into()).is_caller_error());
    /// ```
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::MissingUri
                | Error::Configuration(_)
                | Error::Serialization(_)
                | Error::InvalidUrl(_)
        )
    }
}

/// A specialized `Result` type for transport calls.
pub type Result<T> = std::result::Result<T, Error>;
