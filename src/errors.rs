//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. The session layer
//! propagates these; the dispatcher renders them as text for the agent.

use thiserror::Error;

/// Application error type
///
/// Covers every failure the mailbox session may report. Connection-level
/// variants also tell the session to discard its IMAP handle.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (mailbox, message)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, account disabled)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Transport failure (server unreachable, TLS failure, socket closed)
    #[error("connection error: {0}")]
    Connection(String),
    /// Server rejected a command (NO/BAD response)
    #[error("server rejected command: {0}")]
    Protocol(String),
    /// Message content could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the IMAP connection that produced this error is unusable
    ///
    /// Server-side rejections leave the connection intact; I/O failures and
    /// timeouts leave it in an unknown protocol state.
    pub fn drops_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
