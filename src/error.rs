#![forbid(unsafe_code)]

// Error types shared by the protocol engine, transport and bookkeeping client

use thiserror::Error;

/// Inbound text that could not be decoded into an envelope
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("text does not match the envelope grammar: {0:?}")]
    NotEnvelope(String),

    #[error("event envelope must be an array starting with the event name")]
    MissingName,

    #[error("malformed envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the duplex connection to the target server
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    Closed,
}

/// Failures of the test lifecycle HTTP calls
#[derive(Error, Debug)]
pub enum BookkeepingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl BookkeepingError {
    pub fn status(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = BookkeepingError::status("/admin/test/7", 503);
        assert_eq!(err.to_string(), "/admin/test/7 returned HTTP 503");
    }

    #[test]
    fn test_frame_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        let err: FrameError = json_err.into();
        assert!(matches!(err, FrameError::Json(_)));
    }
}
