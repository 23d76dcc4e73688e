//! Error taxonomy shared by every component. Each session-local failure maps
//! mechanically to a WebSocket close code instead of being string-matched at
//! the call site.

use thiserror::Error;

/// Matches the close codes the browser companion expects byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The PTY reached EOF, or the client disconnected cleanly.
    Normal,
    /// Malformed frame, I/O failure, or an unresolvable service path.
    UnexpectedCondition,
    /// Credential check failed.
    PolicyViolation,
}

impl CloseReason {
    pub const fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::UnexpectedCondition => 1011,
            CloseReason::PolicyViolation => 1008,
        }
    }
}

/// The error taxonomy from the spec's error handling design (section 7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("child process lifecycle error: {0}")]
    ChildLifecycle(String),

    #[error("service configuration error: {0}")]
    Service(String),
}

impl CoreError {
    /// The WS close code a session should use when this error ends it.
    /// Admission rejections never reach this point (they refuse the HTTP
    /// upgrade instead of closing an established session).
    pub fn close_reason(&self) -> CloseReason {
        match self {
            CoreError::Protocol(_) | CoreError::Io(_) | CoreError::ChildLifecycle(_) => {
                CloseReason::UnexpectedCondition
            }
            CoreError::Auth(_) => CloseReason::PolicyViolation,
            CoreError::Admission(_) | CoreError::Service(_) => CloseReason::UnexpectedCondition,
        }
    }
}

/// Why a connection was refused at the FILTER stage (section 4.4).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("server already served its one client (--once)")]
    OnceExhausted,
    #[error("max-clients limit reached")]
    MaxClients,
    #[error("request path does not match the configured WebSocket path")]
    PathMismatch,
    #[error("origin does not match host")]
    OriginMismatch,
}
