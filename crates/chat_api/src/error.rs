use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Longest raw response body carried into an error message.
const MAX_BODY_IN_MESSAGE: usize = 500;

#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("api key is required")]
    MissingApiKey,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("no stream chunk received within {0:?}")]
    ChunkTimeout(Duration),
    #[error("stream carried {pending} bytes that are not valid UTF-8")]
    InvalidUtf8 { pending: usize },
    #[error("stream finished without any deltas")]
    EmptyStream,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ChatApiError>,
    },
    #[error("request was cancelled")]
    Cancelled,
    #[error("runtime failure: {0}")]
    Runtime(String),
}

/// Coarse grouping used by backends and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Protocol,
    Http,
    Cancelled,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Http => "http",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl ChatApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(_) | Self::StreamInterrupted(_) | Self::ChunkTimeout(_) => {
                ErrorKind::Network
            }
            Self::InvalidUtf8 { .. }
            | Self::EmptyStream
            | Self::InvalidResponse(_)
            | Self::Serde(_) => ErrorKind::Protocol,
            Self::Status { .. } => ErrorKind::Http,
            Self::RetryExhausted { last, .. } => last.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::MissingApiKey | Self::InvalidHeader(_) | Self::Runtime(_) => ErrorKind::Other,
        }
    }

    /// Whether another attempt of the same request could plausibly succeed.
    ///
    /// 5xx and 429 are transient; every other status is final. Transport level
    /// failures, stalls, and corrupt byte streams are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Request(error) => !error.is_builder(),
            Self::StreamInterrupted(_) | Self::ChunkTimeout(_) | Self::InvalidUtf8 { .. } => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(error) => error.status(),
            Self::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(rename = "error")]
    value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayloadFields {
    message: Option<String>,
}

/// Human-readable message for a non-2xx response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let explicit = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.value)
        .and_then(|fields| fields.message)
        .filter(|message| !message.trim().is_empty());
    if let Some(message) = explicit {
        return message;
    }

    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    if body.chars().count() > MAX_BODY_IN_MESSAGE {
        let truncated: String = body.chars().take(MAX_BODY_IN_MESSAGE).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;

    use super::{parse_error_message, ChatApiError, ErrorKind};

    fn status(code: u16) -> ChatApiError {
        ChatApiError::Status {
            status: StatusCode::from_u16(code).expect("valid status"),
            message: String::new(),
        }
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        for code in [429, 500, 502, 503, 504] {
            assert!(status(code).is_retryable(), "{code} should retry");
        }
    }

    #[test]
    fn client_errors_are_final() {
        for code in [400, 401, 403, 404, 422] {
            assert!(!status(code).is_retryable(), "{code} should not retry");
        }
    }

    #[test]
    fn stream_failures_are_retryable_network_or_protocol_errors() {
        let stall = ChatApiError::ChunkTimeout(Duration::from_secs(60));
        assert!(stall.is_retryable());
        assert_eq!(stall.kind(), ErrorKind::Network);

        let corrupt = ChatApiError::InvalidUtf8 { pending: 120 };
        assert!(corrupt.is_retryable());
        assert_eq!(corrupt.kind(), ErrorKind::Protocol);

        assert!(!ChatApiError::EmptyStream.is_retryable());
        assert!(!ChatApiError::Cancelled.is_retryable());
    }

    #[test]
    fn exhausted_retry_reports_kind_and_status_of_last_error() {
        let error = ChatApiError::RetryExhausted {
            attempts: 4,
            last: Box::new(status(503)),
        };

        assert_eq!(error.kind(), ErrorKind::Http);
        assert_eq!(error.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!error.is_retryable());
    }

    #[test]
    fn parse_error_message_prefers_structured_message() {
        let message = parse_error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#,
        );
        assert_eq!(message, "model not found");
    }

    #[test]
    fn parse_error_message_falls_back_to_body_then_reason() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream broke"),
            "upstream broke"
        );
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
    }

    #[test]
    fn parse_error_message_truncates_long_bodies() {
        let body = "x".repeat(900);
        let message = parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert_eq!(message.len(), 503);
        assert!(message.ends_with("..."));
    }
}
