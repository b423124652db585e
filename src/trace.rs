//! Structured trace records of request/response pairs.
//!
//! A [`TraceRecorder`] turns one attempt into a [`TraceRecord`] holding only
//! the parts selected by its [`TraceFields`], renders it as compact or
//! pretty JSON and writes it to a [`TraceSink`]. `Authorization` values are
//! always redacted.

use crate::config::{TraceOutput, TransportConfig};
use crate::snapshot::BodySnapshot;
use crate::Headers;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// One part of an exchange that can be traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceField {
    /// Request headers.
    RequestHeaders,
    /// The full request body.
    RequestBody,
    /// The request body, truncated.
    RequestBodySummary,
    /// Response headers.
    ResponseHeaders,
    /// The full response body.
    ResponseBody,
    /// The response body, truncated.
    ResponseBodySummary,
}

impl TraceField {
    /// Every field, in declaration order.
    pub const ALL: [TraceField; 6] = [
        TraceField::RequestHeaders,
        TraceField::RequestBody,
        TraceField::RequestBodySummary,
        TraceField::ResponseHeaders,
        TraceField::ResponseBody,
        TraceField::ResponseBodySummary,
    ];

    fn name(self) -> &'static str {
        match self {
            TraceField::RequestHeaders => "RequestHeaders",
            TraceField::RequestBody => "RequestBody",
            TraceField::RequestBodySummary => "RequestBodySummary",
            TraceField::ResponseHeaders => "ResponseHeaders",
            TraceField::ResponseBody => "ResponseBody",
            TraceField::ResponseBodySummary => "ResponseBodySummary",
        }
    }

    fn expand(name: &str) -> Option<&'static [TraceField]> {
        use TraceField::*;
        let fields: &'static [TraceField] = match name.to_ascii_lowercase().as_str() {
            "requestheaders" => &[RequestHeaders],
            "requestbody" => &[RequestBody],
            "requestbodysummary" => &[RequestBodySummary],
            "responseheaders" => &[ResponseHeaders],
            "responsebody" => &[ResponseBody],
            "responsebodysummary" => &[ResponseBodySummary],
            "request" => &[RequestHeaders, RequestBody],
            "response" => &[ResponseHeaders, ResponseBody],
            "requestsummary" => &[RequestHeaders, RequestBodySummary],
            "responsesummary" => &[ResponseHeaders, ResponseBodySummary],
            "all" => &[RequestHeaders, RequestBody, ResponseHeaders, ResponseBody],
            "summary" => &[
                RequestHeaders,
                RequestBodySummary,
                ResponseHeaders,
                ResponseBodySummary,
            ],
            _ => return None,
        };
        Some(fields)
    }
}

impl fmt::Display for TraceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An unknown trace field name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown trace field: {0}")]
pub struct UnknownTraceField(pub String);

impl FromStr for TraceField {
    type Err = UnknownTraceField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match TraceField::expand(s.trim()) {
            Some([field]) => Ok(*field),
            _ => Err(UnknownTraceField(s.to_string())),
        }
    }
}

/// A set of [`TraceField`]s.
///
/// ```
/// use gridwire::trace::{TraceField, TraceFields};
///
/// let fields = TraceFields::parse("RequestSummary, responseBody");
/// assert!(fields.contains(TraceField::RequestHeaders));
/// assert!(fields.contains(TraceField::RequestBodySummary));
/// assert!(fields.contains(TraceField::ResponseBody));
/// assert!(!fields.contains(TraceField::ResponseHeaders));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFields(BTreeSet<TraceField>);

impl TraceFields {
    /// No fields: tracing disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Headers and full bodies on both sides.
    pub fn full() -> Self {
        Self::parse("All")
    }

    /// Headers and truncated bodies on both sides.
    pub fn summary() -> Self {
        Self::parse("Summary")
    }

    /// Parses a comma-separated list of field names and aliases
    /// (`Request`, `Response`, `RequestSummary`, `ResponseSummary`, `All`,
    /// `Summary`). Matching ignores case; unknown names are skipped.
    pub fn parse(list: &str) -> Self {
        let mut fields = BTreeSet::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match TraceField::expand(name) {
                Some(expanded) => fields.extend(expanded.iter().copied()),
                None => tracing::warn!(field = name, "Ignoring unknown trace field"),
            }
        }
        Self(fields)
    }

    /// Adds a field.
    pub fn insert(&mut self, field: TraceField) {
        self.0.insert(field);
    }

    /// Returns `true` if `field` is selected.
    pub fn contains(&self, field: TraceField) -> bool {
        self.0.contains(&field)
    }

    /// Returns `true` if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn any_request(&self) -> bool {
        self.contains(TraceField::RequestHeaders)
            || self.contains(TraceField::RequestBody)
            || self.contains(TraceField::RequestBodySummary)
    }

    fn any_response(&self) -> bool {
        self.contains(TraceField::ResponseHeaders)
            || self.contains(TraceField::ResponseBody)
            || self.contains(TraceField::ResponseBodySummary)
    }
}

impl FromIterator<TraceField> for TraceFields {
    fn from_iter<I: IntoIterator<Item = TraceField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for TraceFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|field| field.name()).collect();
        f.write_str(&names.join(","))
    }
}

/// Masks an `Authorization` value down to `Bearer ****` and the last four
/// characters of the credential.
///
/// ```
/// use gridwire::trace::redact_authorization;
///
/// assert_eq!(redact_authorization("Bearer abcd1234wxyz"), "Bearer ****wxyz");
/// assert_eq!(redact_authorization("abc"), "Bearer ****");
/// ```
pub fn redact_authorization(value: &str) -> String {
    let credential = value
        .split_once(' ')
        .map(|(_, credential)| credential.trim())
        .unwrap_or(value);
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 4 {
        return "Bearer ****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("Bearer ****{}", tail)
}

/// Headers as they appear in a trace: insertion order, repeated names
/// joined with `, `, `Authorization` redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedHeaders(Vec<(String, String)>);

impl TracedHeaders {
    fn from_headers(headers: &Headers) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (name, value) in headers.iter() {
            let value = if name.eq_ignore_ascii_case(http::header::AUTHORIZATION.as_str()) {
                redact_authorization(value)
            } else {
                value.to_string()
            };
            match entries
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some((_, joined)) => {
                    joined.push_str(", ");
                    joined.push_str(&value);
                }
                None => entries.push((name.to_string(), value)),
            }
        }
        Self(entries)
    }

    /// Returns the traced value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl Serialize for TracedHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// The request half of a [`TraceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestData {
    /// `METHOD uri`.
    pub command: String,
    /// Request headers, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<TracedHeaders>,
    /// Request body text, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The response half of a [`TraceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseData {
    /// `code reason`, e.g. `200 OK`.
    pub status: String,
    /// Response headers, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<TracedHeaders>,
    /// Response body text, if traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Borrowed view of one attempt, the input of [`TraceRecord::build`].
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    /// `METHOD uri` of the request.
    pub command: &'a str,
    /// Headers sent.
    pub request_headers: &'a Headers,
    /// Body sent.
    pub request_body: Option<&'a BodySnapshot>,
    /// `code reason` of the response.
    pub status: &'a str,
    /// Headers received.
    pub response_headers: &'a Headers,
    /// Body received.
    pub response_body: Option<&'a BodySnapshot>,
}

/// A formatted view of one attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    /// The request side, present when any request field is selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestData>,
    /// The response side, present when any response field is selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseData>,
}

impl TraceRecord {
    /// Builds a record from `exchange`, keeping only the selected fields.
    ///
    /// A full body field wins over its summary field when both are selected.
    pub fn build(
        fields: &TraceFields,
        truncate_len: Option<usize>,
        exchange: &Exchange<'_>,
    ) -> Self {
        let request = fields.any_request().then(|| RequestData {
            command: exchange.command.to_string(),
            headers: fields
                .contains(TraceField::RequestHeaders)
                .then(|| TracedHeaders::from_headers(exchange.request_headers)),
            body: body_text(
                exchange.request_body,
                fields.contains(TraceField::RequestBody),
                fields.contains(TraceField::RequestBodySummary),
                truncate_len,
            ),
        });

        let response = fields.any_response().then(|| ResponseData {
            status: exchange.status.to_string(),
            headers: fields
                .contains(TraceField::ResponseHeaders)
                .then(|| TracedHeaders::from_headers(exchange.response_headers)),
            body: body_text(
                exchange.response_body,
                fields.contains(TraceField::ResponseBody),
                fields.contains(TraceField::ResponseBodySummary),
                truncate_len,
            ),
        });

        Self { request, response }
    }

    /// Renders the record as JSON, indented when `pretty` is set.
    pub fn render(&self, pretty: bool) -> String {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        rendered.unwrap_or_else(|e| format!("<unrenderable trace record: {}>", e))
    }
}

fn body_text(
    snapshot: Option<&BodySnapshot>,
    full: bool,
    summary: bool,
    truncate_len: Option<usize>,
) -> Option<String> {
    let snapshot = snapshot?;
    if full {
        Some(snapshot.as_text())
    } else if summary {
        Some(snapshot.as_summary(truncate_len))
    } else {
        None
    }
}

/// Destination of rendered trace records.
///
/// Writes are serialized so records from concurrent calls do not interleave.
#[derive(Clone)]
pub enum TraceSink {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
    /// Any writer, such as an open file.
    Writer(Arc<Mutex<Box<dyn Write + Send>>>),
}

impl TraceSink {
    /// Wraps a writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        TraceSink::Writer(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Opens the configured output. A file that cannot be opened falls back
    /// to standard error.
    pub fn open(output: &TraceOutput) -> Self {
        match output {
            TraceOutput::Stdout => TraceSink::Stdout,
            TraceOutput::Stderr => TraceSink::Stderr,
            TraceOutput::File(path) => {
                match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => Self::from_writer(file),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Cannot open trace file, tracing to stderr"
                        );
                        TraceSink::Stderr
                    }
                }
            }
        }
    }

    /// Writes one record followed by a newline. Failures are logged and
    /// otherwise ignored.
    pub fn write_record(&self, text: &str) {
        let result = match self {
            TraceSink::Stdout => writeln!(std::io::stdout().lock(), "{}", text),
            TraceSink::Stderr => writeln!(std::io::stderr().lock(), "{}", text),
            TraceSink::Writer(writer) => match writer.lock() {
                Ok(mut writer) => writeln!(writer, "{}", text).and_then(|_| writer.flush()),
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "trace writer lock poisoned",
                )),
            },
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to write trace record");
        }
    }
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceSink::Stdout => f.write_str("Stdout"),
            TraceSink::Stderr => f.write_str("Stderr"),
            TraceSink::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Renders and writes trace records for the configured fields.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    fields: TraceFields,
    pretty: bool,
    truncate_len: Option<usize>,
    sink: TraceSink,
    // configured output not opened yet because no field was selected
    unopened: Option<TraceOutput>,
}

impl TraceRecorder {
    /// Creates a recorder.
    pub fn new(
        fields: TraceFields,
        pretty: bool,
        truncate_len: Option<usize>,
        sink: TraceSink,
    ) -> Self {
        Self {
            fields,
            pretty,
            truncate_len,
            sink,
            unopened: None,
        }
    }

    /// Creates a recorder from the trace settings of `config`.
    ///
    /// With no fields selected the configured output is not opened until
    /// [`with_fields`](TraceRecorder::with_fields) enables tracing.
    pub fn from_config(config: &TransportConfig) -> Self {
        if config.trace_fields.is_empty() {
            return Self {
                unopened: Some(config.trace_output.clone()),
                ..Self::new(
                    TraceFields::empty(),
                    config.trace_pretty,
                    config.truncate_len,
                    TraceSink::Stderr,
                )
            };
        }
        Self::new(
            config.trace_fields.clone(),
            config.trace_pretty,
            config.truncate_len,
            TraceSink::open(&config.trace_output),
        )
    }

    /// Returns `true` if any field is selected.
    pub fn is_enabled(&self) -> bool {
        !self.fields.is_empty()
    }

    /// The selected fields.
    pub fn fields(&self) -> &TraceFields {
        &self.fields
    }

    /// Returns a copy with different fields.
    pub fn with_fields(&self, fields: TraceFields) -> Self {
        let mut recorder = Self {
            fields,
            ..self.clone()
        };
        if recorder.is_enabled() {
            if let Some(output) = recorder.unopened.take() {
                recorder.sink = TraceSink::open(&output);
            }
        }
        recorder
    }

    /// Returns a copy with a different layout.
    pub fn with_pretty(&self, pretty: bool) -> Self {
        Self {
            pretty,
            ..self.clone()
        }
    }

    /// Builds the record for `exchange`, or `None` when tracing is disabled.
    pub fn record(&self, exchange: &Exchange<'_>) -> Option<TraceRecord> {
        self.is_enabled()
            .then(|| TraceRecord::build(&self.fields, self.truncate_len, exchange))
    }

    /// Builds, renders and writes the record for `exchange`.
    pub fn emit(&self, exchange: &Exchange<'_>) {
        if let Some(record) = self.record(exchange) {
            self.sink.write_record(&record.render(self.pretty));
        }
    }
}
