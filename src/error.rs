//! Error types shared across the transport layers.
//!
//! Request-level failures never escape the pipeline as `Err`; they travel inside
//! [`Answer::Error`](crate::request::Answer::Error) as a [`TransportError`].

use reqwest::StatusCode;

/// Failure of a single HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established or broke mid-request.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The server answered with a non-success status other than 429.
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// The response body did not match the request's decoder.
    #[error("failed to decode response body: {0}")]
    Decode(String),
    /// The request could not be turned into an HTTP call.
    #[error("failed to build request: {0}")]
    Encode(String),
}

impl TransportError {
    /// Status code for `Status` errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Malformed frame on one of the websocket protocols.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("opcode {op} is missing its payload")]
    MissingPayload { op: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accessor_only_for_status_errors() {
        let err = TransportError::Status { status: StatusCode::BAD_GATEWAY, body: "down".into() };
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(err.to_string().contains("502"));
        assert!(TransportError::Connection("reset".into()).status().is_none());
        assert!(TransportError::Connection("reset".into()).is_connection());
    }

    #[test]
    fn protocol_error_wraps_json() {
        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
