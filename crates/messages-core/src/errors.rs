use std::fmt;
use std::time::Duration;

/// Closed set of API error classes.
///
/// HTTP responses map by status code; stream-reported errors (which carry no
/// status) map by the payload's `type` string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// There was an issue with the format or content of the request.
    InvalidRequest,
    /// There was an issue with the API key.
    Authentication,
    /// The API key does not have permission to use the resource.
    Permission,
    /// The requested resource was not found.
    NotFound,
    /// The account hit a rate limit.
    RateLimit,
    /// Unexpected error internal to the API.
    Api,
    /// The API is temporarily overloaded.
    Overloaded,
    /// Status or error type this client does not know about.
    Unknown,
}

impl ErrorCode {
    /// Maps an HTTP status code. Unlisted statuses map to `Unknown`.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::Permission,
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500 => Self::Api,
            529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// Maps the `error.type` string of an error payload.
    pub fn from_error_type(error_type: &str) -> Self {
        match error_type {
            "invalid_request_error" => Self::InvalidRequest,
            "authentication_error" => Self::Authentication,
            "permission_error" => Self::Permission,
            "not_found_error" => Self::NotFound,
            "rate_limit_error" => Self::RateLimit,
            "api_error" => Self::Api,
            "overloaded_error" => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// HTTP status associated with the code, if any.
    pub fn status(self) -> Option<u16> {
        match self {
            Self::InvalidRequest => Some(400),
            Self::Authentication => Some(401),
            Self::Permission => Some(403),
            Self::NotFound => Some(404),
            Self::RateLimit => Some(429),
            Self::Api => Some(500),
            Self::Overloaded => Some(529),
            Self::Unknown => None,
        }
    }

    /// Wire name of the error type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request_error",
            Self::Authentication => "authentication_error",
            Self::Permission => "permission_error",
            Self::NotFound => "not_found_error",
            Self::RateLimit => "rate_limit_error",
            Self::Api => "api_error",
            Self::Overloaded => "overloaded_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `error` object of an error response or `error` stream event.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    /// Error type string (for example `overloaded_error`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// `{"type": "error", "error": {...}}` wrapper.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

/// Errors surfaced by the executor, the stream decoders and the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Connection-level failure (reset, DNS, body read). Retryable per policy.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Application error reported by the API over HTTP or inside a stream.
    #[error("{error_type}: {message}")]
    Upstream {
        code: ErrorCode,
        error_type: String,
        message: String,
        /// HTTP status, absent for stream-reported errors.
        status: Option<u16>,
    },
    /// Per-attempt deadline elapsed without caller cancellation.
    #[error("request timed out after configured timeout of {configured:?}")]
    Timeout { configured: Duration },
    /// Caller cancelled the call.
    #[error("request cancelled")]
    Cancelled,
    /// Payload of a recognized event kind could not be decoded.
    #[error("malformed stream ({kind}): {message}")]
    MalformedStream { kind: String, message: String },
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an upstream error from a decoded payload.
    ///
    /// With a status the code comes from the status, falling back to the
    /// payload type when the status is not one the API documents.
    pub fn upstream(payload: ErrorPayload, status: Option<u16>) -> Self {
        let code = match status.map(ErrorCode::from_status) {
            Some(ErrorCode::Unknown) | None => ErrorCode::from_error_type(&payload.kind),
            Some(code) => code,
        };
        Self::Upstream {
            code,
            error_type: payload.kind,
            message: payload.message,
            status,
        }
    }

    /// Creates a malformed-stream error for an event kind.
    pub fn malformed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedStream {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Error class of an upstream error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Upstream { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the retry policy may consider this error at all.
    ///
    /// Timeouts, cancellation and malformed payloads always abort the call.
    pub fn is_retryable_kind(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Upstream { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_error_type_round_trips_through_its_code() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::Authentication,
            ErrorCode::Permission,
            ErrorCode::NotFound,
            ErrorCode::RateLimit,
            ErrorCode::Api,
            ErrorCode::Overloaded,
        ] {
            assert_eq!(ErrorCode::from_error_type(code.as_str()), code);
            let status = code.status().expect("known codes have a status");
            assert_eq!(ErrorCode::from_status(status), code);
        }
    }

    #[test]
    fn unknown_type_and_status_map_to_unknown() {
        assert_eq!(ErrorCode::from_error_type("teapot_error"), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_error_type(""), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::Unknown);
    }

    #[test]
    fn upstream_prefers_status_then_falls_back_to_type() {
        let payload = ErrorPayload {
            kind: "overloaded_error".into(),
            message: "busy".into(),
        };
        let from_status = ClientError::upstream(payload.clone(), Some(500));
        assert_eq!(from_status.code(), Some(ErrorCode::Api));

        let from_type = ClientError::upstream(payload.clone(), Some(503));
        assert_eq!(from_type.code(), Some(ErrorCode::Overloaded));

        let stream_reported = ClientError::upstream(payload, None);
        assert_eq!(stream_reported.code(), Some(ErrorCode::Overloaded));
        assert_eq!(stream_reported.to_string(), "overloaded_error: busy");
    }

    #[test]
    fn error_envelope_decodes_wire_shape() {
        let envelope: ErrorEnvelope = serde_json::from_str(
            r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
        )
        .expect("decode");
        assert_eq!(envelope.error.kind, "rate_limit_error");
        assert_eq!(envelope.error.message, "slow down");
    }

    #[test]
    fn only_transport_and_upstream_are_retry_candidates() {
        assert!(ClientError::transport("reset").is_retryable_kind());
        assert!(!ClientError::Cancelled.is_retryable_kind());
        assert!(
            !ClientError::Timeout {
                configured: Duration::from_secs(1)
            }
            .is_retryable_kind()
        );
        assert!(!ClientError::malformed("ping", "bad").is_retryable_kind());
    }
}
