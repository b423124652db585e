//! Transport configuration.
//!
//! Settings are resolved once, usually at application start with
//! [`TransportConfig::from_env`], and injected into each
//! [`Transport`](crate::Transport). Individual transports can override them
//! through their builder.

use crate::retry::DEFAULT_MAX_RETRY_TIME;
use crate::trace::TraceFields;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable names read by [`TransportConfig::from_env`].
pub mod vars {
    /// Retry budget in milliseconds.
    pub const MAX_RETRY_TIME_MS: &str = "GRIDWIRE_MAX_RETRY_TIME_MS";
    /// Comma-separated trace fields, e.g. `RequestHeaders,ResponseBodySummary`.
    pub const TRACE_FIELDS: &str = "GRIDWIRE_TRACE_FIELDS";
    /// `true`/`false`: pretty-print trace records.
    pub const TRACE_PRETTY: &str = "GRIDWIRE_TRACE_PRETTY";
    /// Body summary length in characters, `-1` for no truncation.
    pub const TRACE_TRUNCATE: &str = "GRIDWIRE_TRACE_TRUNCATE";
    /// `stdout`, `stderr` or a file path.
    pub const TRACE_OUTPUT: &str = "GRIDWIRE_TRACE_OUTPUT";
    /// Cap on transparent resends after dropped connections.
    pub const MAX_NETWORK_RETRIES: &str = "GRIDWIRE_MAX_NETWORK_RETRIES";
}

/// Default body summary length.
pub const DEFAULT_TRUNCATE_LEN: usize = 1024;

/// Default cap on transparent resends after dropped connections.
pub const DEFAULT_MAX_NETWORK_RETRIES: usize = 5;

/// Where trace records are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TraceOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// Appended to a file.
    File(PathBuf),
}

impl TraceOutput {
    fn parse(value: &str) -> Self {
        match value.trim() {
            v if v.eq_ignore_ascii_case("stdout") || v.is_empty() => TraceOutput::Stdout,
            v if v.eq_ignore_ascii_case("stderr") => TraceOutput::Stderr,
            path => TraceOutput::File(PathBuf::from(path)),
        }
    }
}

/// Settings shared by the transports of an application.
///
/// # Examples
///
/// ```
/// use gridwire::config::TransportConfig;
/// use gridwire::trace::TraceFields;
/// use std::time::Duration;
///
/// let config = TransportConfig::builder()
///     .max_retry_time(Duration::from_secs(30))
///     .trace_fields(TraceFields::parse("Request,ResponseBodySummary"))
///     .truncate_len(Some(256))
///     .build();
///
/// assert!(config.trace_pretty);
/// assert_eq!(config.max_network_retries, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on the time a call may spend retrying. Defaults to 15 s.
    pub max_retry_time: Duration,

    /// Cap on transparent resends after dropped connections. Defaults to 5.
    pub max_network_retries: usize,

    /// Whether a POST that got no response at all may be resent.
    ///
    /// Defaults to `true`.
    pub retry_post_on_empty_response: bool,

    /// Fields written to the trace output. Empty disables tracing.
    pub trace_fields: TraceFields,

    /// Pretty-print trace records. Defaults to `true`.
    pub trace_pretty: bool,

    /// Body summary length, `None` for no truncation. Defaults to 1024.
    pub truncate_len: Option<usize>,

    /// Destination of trace records.
    pub trace_output: TraceOutput,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
            max_network_retries: DEFAULT_MAX_NETWORK_RETRIES,
            retry_post_on_empty_response: true,
            trace_fields: TraceFields::empty(),
            trace_pretty: true,
            truncate_len: Some(DEFAULT_TRUNCATE_LEN),
            trace_output: TraceOutput::Stdout,
        }
    }
}

impl TransportConfig {
    /// Creates a new builder starting from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] naming the variable when a
    /// value cannot be parsed.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(vars::MAX_RETRY_TIME_MS) {
            let millis: u64 = parse_number(vars::MAX_RETRY_TIME_MS, &value)?;
            config.max_retry_time = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(vars::MAX_NETWORK_RETRIES) {
            config.max_network_retries = parse_number(vars::MAX_NETWORK_RETRIES, &value)?;
        }
        if let Some(value) = lookup(vars::TRACE_FIELDS) {
            config.trace_fields = TraceFields::parse(&value);
        }
        if let Some(value) = lookup(vars::TRACE_PRETTY) {
            config.trace_pretty = parse_bool(vars::TRACE_PRETTY, &value)?;
        }
        if let Some(value) = lookup(vars::TRACE_TRUNCATE) {
            config.truncate_len = parse_truncate_len(&value)?;
        }
        if let Some(value) = lookup(vars::TRACE_OUTPUT) {
            config.trace_output = TraceOutput::parse(&value);
        }

        tracing::debug!(
            max_retry_time_ms = config.max_retry_time.as_millis(),
            trace_fields = %config.trace_fields,
            trace_pretty = config.trace_pretty,
            "Loaded transport configuration"
        );
        Ok(config)
    }
}

/// Builder for [`TransportConfig`].
#[derive(Default)]
pub struct TransportConfigBuilder {
    max_retry_time: Option<Duration>,
    max_network_retries: Option<usize>,
    retry_post_on_empty_response: Option<bool>,
    trace_fields: Option<TraceFields>,
    trace_pretty: Option<bool>,
    truncate_len: Option<Option<usize>>,
    trace_output: Option<TraceOutput>,
}

impl TransportConfigBuilder {
    /// Sets the retry budget.
    pub fn max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = Some(max_retry_time);
        self
    }

    /// Sets the cap on transparent resends after dropped connections.
    pub fn max_network_retries(mut self, max_network_retries: usize) -> Self {
        self.max_network_retries = Some(max_network_retries);
        self
    }

    /// Sets whether a POST that got no response at all may be resent.
    pub fn retry_post_on_empty_response(mut self, enabled: bool) -> Self {
        self.retry_post_on_empty_response = Some(enabled);
        self
    }

    /// Sets the trace fields.
    pub fn trace_fields(mut self, fields: TraceFields) -> Self {
        self.trace_fields = Some(fields);
        self
    }

    /// Sets whether trace records are pretty-printed.
    pub fn trace_pretty(mut self, pretty: bool) -> Self {
        self.trace_pretty = Some(pretty);
        self
    }

    /// Sets the body summary length; `None` disables truncation.
    pub fn truncate_len(mut self, truncate_len: Option<usize>) -> Self {
        self.truncate_len = Some(truncate_len);
        self
    }

    /// Sets the trace destination.
    pub fn trace_output(mut self, output: TraceOutput) -> Self {
        self.trace_output = Some(output);
        self
    }

    /// Builds the `TransportConfig`.
    pub fn build(self) -> TransportConfig {
        let default = TransportConfig::default();
        TransportConfig {
            max_retry_time: self.max_retry_time.unwrap_or(default.max_retry_time),
            max_network_retries: self
                .max_network_retries
                .unwrap_or(default.max_network_retries),
            retry_post_on_empty_response: self
                .retry_post_on_empty_response
                .unwrap_or(default.retry_post_on_empty_response),
            trace_fields: self.trace_fields.unwrap_or(default.trace_fields),
            trace_pretty: self.trace_pretty.unwrap_or(default.trace_pretty),
            truncate_len: self.truncate_len.unwrap_or(default.truncate_len),
            trace_output: self.trace_output.unwrap_or(default.trace_output),
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| crate::Error::Configuration(format!("invalid value for {}: {}", var, e)))
}

fn parse_bool(var: &str, value: &str) -> crate::Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(crate::Error::Configuration(format!(
            "invalid value for {}: expected a boolean, got {:?}",
            var, other
        ))),
    }
}

fn parse_truncate_len(value: &str) -> crate::Result<Option<usize>> {
    let len: i64 = parse_number(vars::TRACE_TRUNCATE, value)?;
    match len {
        -1 => Ok(None),
        len if len >= 0 => Ok(Some(len as usize)),
        len => Err(crate::Error::Configuration(format!(
            "invalid value for {}: {} (use -1 to disable truncation)",
            vars::TRACE_TRUNCATE,
            len
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceField;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.max_retry_time, Duration::from_millis(15_000));
        assert!(config.trace_fields.is_empty());
        assert!(config.trace_pretty);
        assert_eq!(config.truncate_len, Some(1024));
    }

    #[test]
    fn test_env_overrides() {
        let config = TransportConfig::from_lookup(lookup(&[
            (vars::MAX_RETRY_TIME_MS, "30000"),
            (vars::TRACE_FIELDS, "RequestHeaders, ResponseBody"),
            (vars::TRACE_PRETTY, "false"),
            (vars::TRACE_TRUNCATE, "-1"),
            (vars::TRACE_OUTPUT, "/tmp/gridwire-trace.log"),
            (vars::MAX_NETWORK_RETRIES, "2"),
        ]))
        .unwrap();

        assert_eq!(config.max_retry_time, Duration::from_secs(30));
        assert!(config.trace_fields.contains(TraceField::RequestHeaders));
        assert!(config.trace_fields.contains(TraceField::ResponseBody));
        assert!(!config.trace_fields.contains(TraceField::RequestBody));
        assert!(!config.trace_pretty);
        assert_eq!(config.truncate_len, None);
        assert_eq!(
            config.trace_output,
            TraceOutput::File(PathBuf::from("/tmp/gridwire-trace.log"))
        );
        assert_eq!(config.max_network_retries, 2);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = TransportConfig::from_lookup(lookup(&[(vars::MAX_RETRY_TIME_MS, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(vars::MAX_RETRY_TIME_MS));

        assert!(TransportConfig::from_lookup(lookup(&[(vars::TRACE_PRETTY, "maybe")])).is_err());
        assert!(TransportConfig::from_lookup(lookup(&[(vars::TRACE_TRUNCATE, "-5")])).is_err());
    }

    #[test]
    fn test_trace_output_parse() {
        assert_eq!(TraceOutput::parse("STDERR"), TraceOutput::Stderr);
        assert_eq!(TraceOutput::parse(""), TraceOutput::Stdout);
    }

    #[test]
    fn test_builder_overrides_defaults() {
        let config = TransportConfig::builder()
            .retry_post_on_empty_response(false)
            .truncate_len(None)
            .build();
        assert!(!config.retry_post_on_empty_response);
        assert_eq!(config.truncate_len, None);
        assert_eq!(config.max_retry_time, DEFAULT_MAX_RETRY_TIME);
    }
}
