//! Request and response bodies.
//!
//! A [`Body`] is either backed by an in-memory buffer, which can be re-read
//! from a marked position, or by a forward-only async reader that can be
//! consumed exactly once. The transport drains forward-only bodies into a
//! buffer before its first attempt so every retry can resend the same bytes.

use bytes::Bytes;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A body with its declared content type and length.
pub struct Body {
    content_type: Option<String>,
    content_length: Option<u64>,
    source: BodySource,
}

enum BodySource {
    Buffered {
        data: Bytes,
        position: usize,
        mark: usize,
    },
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A reader that was partially consumed by a failed drain.
    Consumed,
}

impl Body {
    /// Creates a re-readable body over `data`.
    ///
    /// The declared length is the buffer length.
    ///
    /// ```
    /// use gridwire::Body;
    ///
    /// let body = Body::from_bytes("{\"name\":\"Q3\"}", Some("application/json"));
    /// assert!(body.is_repeatable());
    /// assert_eq!(body.content_length(), Some(13));
    /// ```
    pub fn from_bytes(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        let data = data.into();
        Self {
            content_type: content_type.map(str::to_string),
            content_length: Some(data.len() as u64),
            source: BodySource::Buffered {
                data,
                position: 0,
                mark: 0,
            },
        }
    }

    /// Creates a forward-only body over `reader`.
    pub fn from_reader<R>(
        reader: R,
        content_type: Option<&str>,
        content_length: Option<u64>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            content_type: content_type.map(str::to_string),
            content_length,
            source: BodySource::Reader(Box::new(reader)),
        }
    }

    /// Creates a JSON body from a serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if the value cannot be encoded.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        Ok(Self::from_bytes(encoded, Some(crate::JSON_CONTENT_TYPE)))
    }

    /// The declared content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The declared content length, if known.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Returns `true` if the body can be rewound and sent again.
    pub fn is_repeatable(&self) -> bool {
        matches!(self.source, BodySource::Buffered { .. })
    }

    /// Drains a forward-only source into a buffer and replaces the source
    /// with it. Buffered bodies are left untouched.
    ///
    /// The declared length is updated to the number of bytes actually read.
    ///
    /// # Errors
    ///
    /// Returns the read error. The original reader is unusable afterwards.
    pub async fn make_repeatable(&mut self) -> std::io::Result<()> {
        let mut reader = match std::mem::replace(&mut self.source, BodySource::Consumed) {
            BodySource::Reader(reader) => reader,
            BodySource::Consumed => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "body source was already consumed",
                ))
            }
            buffered => {
                self.source = buffered;
                return Ok(());
            }
        };

        let capacity = self.content_length.unwrap_or(0).min(1 << 20) as usize;
        let mut buf = Vec::with_capacity(capacity);
        reader.read_to_end(&mut buf).await?;

        self.content_length = Some(buf.len() as u64);
        self.source = BodySource::Buffered {
            data: Bytes::from(buf),
            position: 0,
            mark: 0,
        };
        Ok(())
    }

    /// Remembers the current read position for a later [`reset`](Body::reset).
    pub fn mark(&mut self) {
        if let BodySource::Buffered { position, mark, .. } = &mut self.source {
            *mark = *position;
        }
    }

    /// Rewinds to the last marked position.
    ///
    /// Returns `false` if the body is not re-readable.
    pub fn reset(&mut self) -> bool {
        match &mut self.source {
            BodySource::Buffered { position, mark, .. } => {
                *position = *mark;
                true
            }
            _ => false,
        }
    }

    /// Returns the unread bytes without consuming them.
    ///
    /// `None` for forward-only bodies.
    pub fn peek(&self) -> Option<Bytes> {
        match &self.source {
            BodySource::Buffered { data, position, .. } => Some(data.slice(*position..)),
            _ => None,
        }
    }

    /// Consumes the unread bytes, as a send does.
    ///
    /// `None` for forward-only bodies.
    pub fn take(&mut self) -> Option<Bytes> {
        match &mut self.source {
            BodySource::Buffered { data, position, .. } => {
                let remaining = data.slice(*position..);
                *position = data.len();
                Some(remaining)
            }
            _ => None,
        }
    }

    /// Reads the whole remaining body into memory.
    ///
    /// # Errors
    ///
    /// Returns the read error of a forward-only source.
    pub async fn into_bytes(mut self) -> std::io::Result<Bytes> {
        self.make_repeatable().await?;
        Ok(self.take().unwrap_or_default())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BodySource::Buffered { data, position, .. } => {
                format!("Buffered({} bytes, position {})", data.len(), position)
            }
            BodySource::Reader(_) => "Reader".to_string(),
            BodySource::Consumed => "Consumed".to_string(),
        };
        f.debug_struct("Body")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("source", &source)
            .finish()
    }
}
