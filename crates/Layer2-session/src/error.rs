//! Session protocol error types
//!
//! SessionError covers transport, status and decoding failures talking to the
//! agent server. Conversion into `agentbox_foundation::Error` is provided.

use agentbox_foundation::Error as FoundationError;
use thiserror::Error;

/// Result alias for session protocol calls
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors raised by the session protocol client
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Connection refused, reset, DNS, ...
    #[error("Transport error: {0}")]
    Transport(String),

    /// The per-call timeout elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server answered with a status the endpoint does not accept
    #[error("Unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// The body could not be decoded
    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse {
        endpoint: &'static str,
        message: String,
    },

    /// The event stream failed mid-flight
    #[error("Stream error: {0}")]
    Stream(String),
}

impl SessionError {
    /// Status error helper
    pub fn status(endpoint: &'static str, status: u16, body: impl Into<String>) -> Self {
        SessionError::UnexpectedStatus {
            endpoint,
            status,
            body: body.into(),
        }
    }

    /// Decode error helper
    pub fn invalid(endpoint: &'static str, message: impl Into<String>) -> Self {
        SessionError::InvalidResponse {
            endpoint,
            message: message.into(),
        }
    }

    /// Whether the failure happened before any response was received
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Timeout(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout(err.to_string())
        } else {
            SessionError::Transport(err.to_string())
        }
    }
}

// ============================================================================
// agentbox_foundation::Error conversion
// ============================================================================

impl From<SessionError> for FoundationError {
    fn from(err: SessionError) -> Self {
        FoundationError::Internal(format!("session protocol: {}", err))
    }
}
