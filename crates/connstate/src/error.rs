//! Error types for connection state validation

use crate::context::ConnectionId;
use std::fmt;
use thiserror::Error;

/// Protocol-level error codes reported back to the client
///
/// The numeric values are what the wire protocol carries in its
/// error-response message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[repr(u32)]
pub enum ErrorCode {
    AuthenticationRequired = 10,
    InvalidCredentials = 11,
    AlreadyAuthenticated = 12,
    AuthenticationNotSupported = 13,
    AuthorizationFailed = 20,
    UnknownOperation = 50,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self.into()
    }

    /// Canonical wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::AlreadyAuthenticated => "ALREADY_AUTHENTICATED",
            ErrorCode::AuthenticationNotSupported => "AUTHENTICATION_NOT_SUPPORTED",
            ErrorCode::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorCode::UnknownOperation => "UNKNOWN_OPERATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection raised whenever the state machine refuses an operation
///
/// This is the only error kind produced by operation validation and state
/// transitions. It never closes the connection on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ConnectionStateError {
    code: ErrorCode,
    message: String,
}

impl ConnectionStateError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn authentication_required(msg: &str) -> Self {
        Self::new(ErrorCode::AuthenticationRequired, msg)
    }

    pub fn invalid_credentials(msg: &str) -> Self {
        Self::new(ErrorCode::InvalidCredentials, msg)
    }

    pub fn already_authenticated(msg: &str) -> Self {
        Self::new(ErrorCode::AlreadyAuthenticated, msg)
    }

    pub fn authentication_not_supported(msg: &str) -> Self {
        Self::new(ErrorCode::AuthenticationNotSupported, msg)
    }

    pub fn authorization_failed(msg: &str) -> Self {
        Self::new(ErrorCode::AuthorizationFailed, msg)
    }

    pub fn unknown_operation(msg: &str) -> Self {
        Self::new(ErrorCode::UnknownOperation, msg)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this rejection is a failed credential check
    ///
    /// The transport counts these to enforce its retry limit.
    pub fn is_authentication_failure(&self) -> bool {
        self.code == ErrorCode::InvalidCredentials
    }
}

/// Errors that are not protocol rejections
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection state error: {0}")]
    State(#[from] ConnectionStateError),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn keyring_error(msg: &str) -> Self {
        Self::Keyring(msg.to_string())
    }

    /// The protocol rejection carried by this error, if any
    pub fn as_state_error(&self) -> Option<&ConnectionStateError> {
        match self {
            Error::State(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for operations that may fail outside the protocol taxonomy
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for validation and transitions
pub type StateResult<T> = std::result::Result<T, ConnectionStateError>;
