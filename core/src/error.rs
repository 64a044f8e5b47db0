//! Error types for the API client.
//!
//! # Design
//! Every failed operation surfaces as a single `ApiError` carrying the HTTP
//! status (0 when no response was received), a human-readable message and an
//! optional application code supplied by the server. The `kind` tag is the
//! closed classification callers branch on, so a catch-site never has to
//! inspect message text to tell a cancellation from a real failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of an `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server answered with a 4xx status.
    Client,
    /// The server answered with a 5xx (or other non-success) status.
    Server,
    /// No response was received: DNS, connect, reset.
    Network,
    /// The attempt did not settle within the configured timeout.
    Timeout,
    /// Cancelled explicitly through the client or registry.
    Cancelled,
    /// Cancelled because a newer request claimed the same cache key.
    Superseded,
    /// A success body could not be decoded into the payload type.
    Decode,
    /// The request body could not be encoded as JSON.
    Encode,
}

/// A failed API operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(from = "WireError")]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing)]
    pub kind: ErrorKind,
}

/// Serialized form of `ApiError`; the kind is not on the wire.
#[derive(Deserialize)]
struct WireError {
    status: u16,
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl From<WireError> for ApiError {
    fn from(wire: WireError) -> Self {
        let error = Self::new(wire.status, wire.message);
        match wire.code {
            Some(code) => error.with_code(code),
            None => error,
        }
    }
}

impl ApiError {
    /// Build an error from a status and message. The kind is inferred from
    /// the status: 4xx is a client error, anything else a server error.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        let kind = if (400..500).contains(&status) {
            ErrorKind::Client
        } else {
            ErrorKind::Server
        };
        Self {
            status,
            message: message.into(),
            code: None,
            kind,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub(crate) fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn network(detail: impl std::fmt::Display) -> Self {
        Self::new(0, format!("Network error: {detail}")).with_kind(ErrorKind::Network)
    }

    pub fn timeout() -> Self {
        Self::new(0, "Request timed out").with_kind(ErrorKind::Timeout)
    }

    pub fn cancelled() -> Self {
        Self::new(0, "Request cancelled").with_kind(ErrorKind::Cancelled)
    }

    pub fn superseded() -> Self {
        Self::new(0, "Request superseded by a newer request").with_kind(ErrorKind::Superseded)
    }

    pub fn max_retries_exceeded() -> Self {
        Self::new(0, "Max retries exceeded").with_kind(ErrorKind::Network)
    }

    pub fn decode(status: u16, detail: impl std::fmt::Display) -> Self {
        Self::new(status, format!("Failed to decode response: {detail}")).with_kind(ErrorKind::Decode)
    }

    pub fn encode(detail: impl std::fmt::Display) -> Self {
        Self::new(0, format!("Failed to encode request body: {detail}")).with_kind(ErrorKind::Encode)
    }

    /// True for both explicit cancellation and supersession.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::Superseded)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub fn is_client_error(&self) -> bool {
        self.kind == ErrorKind::Client
    }

    pub fn is_server_error(&self) -> bool {
        self.kind == ErrorKind::Server
    }

    pub fn is_network_error(&self) -> bool {
        self.kind == ErrorKind::Network
    }
}

/// Failure of the underlying transport before any HTTP response arrived.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Invalid configuration supplied through the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_determines_default_kind() {
        assert_eq!(ApiError::new(404, "missing").kind, ErrorKind::Client);
        assert_eq!(ApiError::new(503, "down").kind, ErrorKind::Server);
    }

    #[test]
    fn code_is_absent_unless_supplied() {
        let err = ApiError::new(422, "invalid");
        assert!(err.code.is_none());
        let err = err.with_code("VALIDATION");
        assert_eq!(err.code.as_deref(), Some("VALIDATION"));
    }

    #[test]
    fn display_is_the_message() {
        assert_eq!(ApiError::timeout().to_string(), "Request timed out");
    }

    #[test]
    fn superseded_and_cancelled_are_both_cancellations() {
        assert!(ApiError::cancelled().is_cancelled());
        assert!(ApiError::superseded().is_cancelled());
        assert!(!ApiError::timeout().is_cancelled());
        assert_eq!(ApiError::superseded().status, 0);
    }

    #[test]
    fn serializes_without_kind() {
        let json = serde_json::to_value(ApiError::new(404, "nope").with_code("NF")).unwrap();
        assert_eq!(json, serde_json::json!({"status": 404, "message": "nope", "code": "NF"}));
    }

    #[test]
    fn deserialized_kind_follows_status() {
        let err: ApiError = serde_json::from_str(r#"{"status":404,"message":"nope","code":"NF"}"#).unwrap();
        assert_eq!(err.kind, ErrorKind::Client);
        assert!(err.is_client_error());
        assert_eq!(err.code.as_deref(), Some("NF"));

        let err: ApiError = serde_json::from_str(r#"{"status":502,"message":"bad gateway"}"#).unwrap();
        assert!(err.is_server_error());
        assert!(err.code.is_none());
    }
}
