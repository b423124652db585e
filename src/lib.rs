//! # Gridwire - A resilient HTTP transport for sheets REST APIs
//!
//! Gridwire sits between a REST API client and the network. It executes one
//! logical call as a sequence of attempts, retries the ones the service marks
//! as transient, and records what went over the wire for diagnostics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gridwire::{Request, Transport};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Sheet {
//!     id: u64,
//!     name: String,
//!     total_row_count: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gridwire::Error> {
//!     let transport = Transport::builder()
//!         .access_token("ll352u9jujauoqz4gstvsae05")?
//!         .build()?;
//!
//!     let response = transport
//!         .get("https://api.example.com/2.0/sheets/4583173393803140")
//!         .await?;
//!
//!     if response.is_success() {
//!         let sheet: Sheet = response.json()?;
//!         println!("{} has {} rows", sheet.name, sheet.total_row_count);
//!     } else {
//!         println!("gave up after {} attempts: {}", response.attempts, response.text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Retries
//!
//! A response with status 200 ends the call. Any other response is decoded as
//! an error payload (`{"errorCode": 4003, "message": "..."}`). Error codes
//! 4001 to 4004 are transient: the call waits `2^attempt` seconds plus up to
//! one second of jitter and tries again, as long as the total time stays
//! within the retry budget (15 seconds by default). When the budget runs out
//! the last failing response is returned, not an error.
//!
//! Connections that drop before a response arrives are resent without
//! consulting the retry policy, for methods where that is safe.
//!
//! ```no_run
//! use gridwire::retry::RetryPolicy;
//! use gridwire::{ErrorPayload, Transport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct FlatBackoff;
//!
//! impl RetryPolicy for FlatBackoff {
//!     fn calc_backoff(
//!         &self,
//!         _attempt: usize,
//!         _elapsed: Duration,
//!         _error: &ErrorPayload,
//!     ) -> Duration {
//!         Duration::from_millis(500)
//!     }
//! }
//!
//! # fn example() -> Result<(), gridwire::Error> {
//! let transport = Transport::builder()
//!     .retry_policy(Arc::new(FlatBackoff))
//!     .max_retry_time(Duration::from_secs(60))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tracing
//!
//! Every attempt is logged with `tracing` under the `gridwire` target. On top
//! of that, a per-transport trace recorder can write each exchange as a JSON
//! record, selected with `GRIDWIRE_TRACE_FIELDS=RequestSummary,Response` or
//! [`TransportBuilder::trace_fields`]. `Authorization` headers never appear
//! in clear text.
//!
//! ## Modules
//!
//! - [`transport`] - the retry loop and its builder
//! - [`retry`] - retry policy, backoff and sleeping
//! - [`trace`] - trace field selection, redaction and JSON records
//! - [`snapshot`] - body capture and text rendering
//! - [`engine`] - the single-attempt network layer
//! - [`config`] - environment driven configuration

mod body;
pub mod config;
pub mod engine;
mod error;
mod headers;
mod payload;
mod request;
mod response;
pub mod retry;
pub mod snapshot;
pub mod trace;
pub mod transport;

pub use body::Body;
pub use error::{Error, Result};
pub use headers::Headers;
pub use payload::{DecodeError, ErrorDecoder, ErrorPayload, JsonErrorDecoder};
pub use request::Request;
pub use response::Response;
pub use transport::{Transport, TransportBuilder};

/// Media type of JSON request and error bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";
