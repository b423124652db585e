//! The request handed to the transport.

use crate::{Body, Headers};
use http::Method;
use url::Url;

/// One logical API call: method, target, headers and an optional body.
///
/// The URI is optional so callers that assemble requests in stages can hand
/// over an incomplete one; [`Transport::execute`](crate::Transport::execute)
/// rejects it before any I/O.
#[derive(Debug)]
pub struct Request {
    /// The HTTP method (GET, POST, PUT, DELETE, ...).
    pub method: Method,

    /// The absolute target URI.
    pub uri: Option<Url>,

    /// Request-specific headers. These override the transport's default
    /// headers on conflicting names.
    pub headers: Headers,

    /// The request body.
    pub body: Option<Body>,
}

impl Request {
    /// Creates a request for `method` and an absolute `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI cannot be parsed.
    pub fn new(method: Method, uri: impl AsRef<str>) -> crate::Result<Self> {
        Ok(Self::with_url(method, Url::parse(uri.as_ref())?))
    }

    /// Creates a request from an already parsed URL.
    pub fn with_url(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri: Some(uri),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a request without a target.
    pub fn without_uri(method: Method) -> Self {
        Self {
            method,
            uri: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Sets a header, replacing earlier values for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches a body.
    ///
    /// A `Content-Type` header is added from the body's declared type unless
    /// one is already set.
    pub fn with_body(mut self, body: Body) -> Self {
        if let Some(content_type) = body.content_type() {
            let name = http::header::CONTENT_TYPE.as_str();
            if !self.headers.contains(name) {
                self.headers.insert(name, content_type);
            }
        }
        self.body = Some(body);
        self
    }

    /// Attaches a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if the value cannot be encoded.
    pub fn with_json<T: serde::Serialize + ?Sized>(self, value: &T) -> crate::Result<Self> {
        Ok(self.with_body(Body::json(value)?))
    }

    /// Appends a query parameter to the URI. No-op without a URI.
    pub fn with_query_param(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Some(uri) = self.uri.as_mut() {
            uri.query_pairs_mut()
                .append_pair(key.as_ref(), value.as_ref());
        }
        self
    }

    /// `METHOD uri`, as shown in logs and traces.
    pub fn command(&self) -> String {
        match &self.uri {
            Some(uri) => format!("{} {}", self.method, uri),
            None => format!("{} <no uri>", self.method),
        }
    }
}
