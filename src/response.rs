//! The response of one transport call.
//!
//! The [`Response`] type carries the status, the headers exactly as they came
//! back from the engine and the fully buffered body, together with how many
//! attempts the call took.

use crate::payload::{DecodeError, ErrorDecoder, ErrorPayload};
use crate::{Body, Headers};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// The response of the last attempt of a call.
///
/// A response with a failing status is still returned as `Ok` by
/// [`Transport::execute`](crate::Transport::execute); check
/// [`is_success`](Response::is_success) before decoding.
///
/// # Examples
///
/// ```no_run
/// use gridwire::{Request, Transport};
/// use http::Method;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Sheet {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), gridwire::Error> {
/// let transport = Transport::builder().build()?;
/// let request = Request::new(Method::GET, "https://api.example.com/2.0/sheets/42")?;
/// let response = transport.execute(request).await?;
///
/// if response.is_success() {
///     let sheet: Sheet = response.json()?;
///     println!("{} ({})", sheet.name, sheet.id);
/// } else {
///     println!("Status {} after {} attempts", response.status, response.attempts);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,

    /// The status text: the reason phrase observed on the wire, falling back
    /// to the canonical one.
    pub status_text: String,

    /// The response headers as received, including any added by
    /// content-encoding negotiation.
    pub headers: Headers,

    /// The buffered response body, `None` when the server sent no bytes.
    pub body: Option<Body>,

    /// The number of attempts made for this call, including this one.
    pub attempts: usize,

    /// Time from the start of the first attempt until this response was read.
    pub elapsed: Duration,
}

impl Response {
    /// Creates a response for a single attempt.
    pub fn new(status: StatusCode, headers: Headers, body: Option<Body>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            attempts: 1,
            elapsed: Duration::ZERO,
        }
    }

    /// Returns `true` for a 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The body's declared content type, falling back to the
    /// `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(Body::content_type)
            .or_else(|| self.headers.get(http::header::CONTENT_TYPE.as_str()))
    }

    /// The unread body bytes; empty when there is no body.
    pub fn bytes(&self) -> Bytes {
        self.body
            .as_ref()
            .and_then(Body::peek)
            .unwrap_or_default()
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] with the raw body when decoding fails.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        let bytes = self.bytes();
        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!(
                error = %e,
                status = self.status.as_u16(),
                "Failed to decode response body"
            );
            crate::Error::Decode {
                message: e.to_string(),
                raw_response: String::from_utf8_lossy(&bytes).into_owned(),
            }
        })
    }

    /// Decodes the body as an API error payload.
    pub fn error_payload(&self, decoder: &dyn ErrorDecoder) -> Result<ErrorPayload, DecodeError> {
        decoder.decode_error(&self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JsonErrorDecoder;

    fn json_response(status: u16, body: &str) -> Response {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json;charset=UTF-8");
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            Some(Body::from_bytes(body.to_string(), Some("application/json;charset=UTF-8"))),
        )
    }

    #[test]
    fn test_status_text_is_canonical_reason() {
        let response = json_response(429, "{}");
        assert_eq!(response.status_text, "Too Many Requests");
        assert!(!response.is_success());
        assert!(!response.was_retried());
    }

    #[test]
    fn test_json_decode() {
        #[derive(serde::Deserialize)]
        struct Row {
            id: u64,
        }

        let response = json_response(200, r#"{"id": 9}"#);
        let row: Row = response.json().unwrap();
        assert_eq!(row.id, 9);
        // decoding does not consume the body
        assert_eq!(response.text(), r#"{"id": 9}"#);
    }

    #[test]
    fn test_json_decode_error_keeps_raw_body() {
        let response = json_response(200, "not json");
        match response.json::<serde_json::Value>() {
            Err(crate::Error::Decode { raw_response, .. }) => assert_eq!(raw_response, "not json"),
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_payload() {
        let response = json_response(503, r#"{"errorCode":4001,"message":"Maintenance"}"#);
        let payload = response.error_payload(&JsonErrorDecoder).unwrap();
        assert_eq!(payload.error_code, 4001);
    }

    #[test]
    fn test_empty_body() {
        let response = Response::new(StatusCode::NO_CONTENT, Headers::new(), None);
        assert!(response.bytes().is_empty());
        assert_eq!(response.text(), "");
        assert_eq!(response.content_type(), None);
    }
}
