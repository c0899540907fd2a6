//! Account client error types
//!
//! Errors are tagged at the transport boundary so callers can classify
//! retryability by variant instead of by message.

use thiserror::Error;

/// Phrases that mark a remote failure as transient.
const TRANSIENT_MARKERS: [&str; 7] = [
    "timeout",
    "unavailable",
    "network",
    "connection refused",
    "connection failed",
    "deadline exceeded",
    "temporary",
];

/// Substring classifier for errors that only carry a message.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountClientError {
    /// Channel is not ready, or the dial itself failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("account service unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The account service answered with `success = false`
    #[error("{message}")]
    Rejected { message: String },

    #[error("failed to decode account service response: {0}")]
    Decode(String),
}

impl AccountClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AccountClientError::ConnectionFailed(_)
            | AccountClientError::Unavailable(_)
            | AccountClientError::Timeout(_) => true,
            AccountClientError::Rejected { message } => is_transient_message(message),
            AccountClientError::Transport(message) => is_transient_message(message),
            AccountClientError::Decode(_) => false,
        }
    }

    /// Operator-visible message returned by the account service, if any
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            AccountClientError::Rejected { message } => Some(message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AccountClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AccountClientError::Timeout(e.to_string())
        } else if e.is_connect() {
            AccountClientError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            AccountClientError::Decode(e.to_string())
        } else {
            AccountClientError::Transport(e.to_string())
        }
    }
}
