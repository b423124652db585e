//! Point-in-time copies of request and response bodies.
//!
//! A [`BodySnapshot`] owns the bytes it captured, so sending or parsing the
//! original body afterwards does not change what gets logged or traced.

use crate::{Body, Headers};
use bytes::Bytes;

/// Appended to text cut by [`truncate`].
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// An immutable copy of a body's bytes and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySnapshot {
    bytes: Bytes,
    content_type: Option<String>,
    content_length: Option<u64>,
    binary: bool,
}

impl BodySnapshot {
    /// Captures the unread bytes of `body`.
    ///
    /// A forward-only body is first drained into a buffer, which replaces its
    /// source, so the body stays usable afterwards. The bytes are copied
    /// without moving the body's read position.
    ///
    /// `headers` are the headers of the message the body belongs to; a
    /// `Content-Disposition` header marks the body as binary.
    ///
    /// Returns `Ok(None)` when there is no body or it is empty.
    ///
    /// # Errors
    ///
    /// Returns the read error of a forward-only source.
    pub async fn capture(
        body: Option<&mut Body>,
        headers: &Headers,
    ) -> std::io::Result<Option<BodySnapshot>> {
        let Some(body) = body else {
            return Ok(None);
        };
        body.make_repeatable().await?;
        Ok(Self::of_buffered(body, headers))
    }

    /// Captures a body that is already buffered.
    ///
    /// Returns `None` for forward-only or empty bodies.
    pub fn of_buffered(body: &Body, headers: &Headers) -> Option<BodySnapshot> {
        let bytes = body.peek()?;
        if bytes.is_empty() {
            return None;
        }
        Some(BodySnapshot {
            bytes,
            content_type: body.content_type().map(str::to_string),
            content_length: body.content_length(),
            binary: headers.contains(http::header::CONTENT_DISPOSITION.as_str()),
        })
    }

    /// The captured bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The content type declared when the snapshot was taken.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The declared length, falling back to the captured length.
    pub fn content_length(&self) -> u64 {
        self.content_length.unwrap_or(self.bytes.len() as u64)
    }

    /// Returns `true` if the body was flagged as binary.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Renders the snapshot for logs.
    ///
    /// Text bodies are decoded as UTF-8, replacing invalid sequences. Binary
    /// bodies become a placeholder with their type and length.
    pub fn as_text(&self) -> String {
        if self.binary {
            return format!(
                "<< binary body: {}, {} bytes >>",
                self.content_type.as_deref().unwrap_or("unknown type"),
                self.content_length()
            );
        }
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Renders the snapshot for logs, cutting text bodies at `max_len`
    /// characters. Binary placeholders are never cut.
    pub fn as_summary(&self, max_len: Option<usize>) -> String {
        if self.binary {
            return self.as_text();
        }
        truncate(&self.as_text(), max_len)
    }
}

/// Cuts `text` to at most `max_len` characters, appending
/// [`TRUNCATION_MARKER`] when something was removed.
///
/// `None` disables truncation.
///
/// ```
/// use gridwire::snapshot::truncate;
///
/// assert_eq!(truncate("short", Some(10)), "short");
/// assert_eq!(truncate("0123456789", Some(4)), "0123...(truncated)");
/// assert_eq!(truncate("0123456789", None), "0123456789");
/// ```
pub fn truncate(text: &str, max_len: Option<usize>) -> String {
    let Some(max_len) = max_len else {
        return text.to_string();
    };
    match text.char_indices().nth(max_len) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
