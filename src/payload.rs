//! Structured error bodies returned by the API.

use serde::{Deserialize, Serialize};

/// A decoded error body such as
/// `{"errorCode": 4003, "message": "Rate limit exceeded.", "refId": "x1y2"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Application-defined error code.
    pub error_code: i32,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Server-side reference for support requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
}

/// The body could not be decoded into an [`ErrorPayload`].
///
/// Kept distinct from a payload that decoded fine but carries a code nobody
/// wants to retry.
#[derive(Debug, thiserror::Error)]
#[error("Failed to decode error payload: {0}")]
pub struct DecodeError(pub String);

/// Turns raw error bodies into [`ErrorPayload`]s.
///
/// This is the seam to the client's serializer; [`JsonErrorDecoder`] is used
/// unless the transport is given another one.
pub trait ErrorDecoder: Send + Sync {
    /// Decodes `bytes` into an error payload.
    fn decode_error(&self, bytes: &[u8]) -> Result<ErrorPayload, DecodeError>;
}

/// Decodes error payloads with `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorDecoder;

impl ErrorDecoder for JsonErrorDecoder {
    fn decode_error(&self, bytes: &[u8]) -> Result<ErrorPayload, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_payload() {
        let payload = JsonErrorDecoder
            .decode_error(br#"{"errorCode":4003,"message":"Rate limit exceeded.","refId":"abc"}"#)
            .unwrap();
        assert_eq!(payload.error_code, 4003);
        assert_eq!(payload.message, "Rate limit exceeded.");
        assert_eq!(payload.ref_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_without_optional_fields() {
        let payload = JsonErrorDecoder.decode_error(br#"{"errorCode":1006}"#).unwrap();
        assert_eq!(payload.error_code, 1006);
        assert!(payload.message.is_empty());
        assert!(payload.ref_id.is_none());
    }

    #[test]
    fn test_decode_failures() {
        assert!(JsonErrorDecoder.decode_error(b"<html>bad gateway</html>").is_err());
        assert!(JsonErrorDecoder.decode_error(br#"{"message":"no code"}"#).is_err());
        assert!(JsonErrorDecoder.decode_error(b"").is_err());
    }
}
