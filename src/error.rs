//! Error types for tasksync
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Transport classification (timeout / closed / other) for the sync loops
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for tasksync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Transport errors (3xx)
    TransportTimeout = 300,
    TransportClosed = 301,
    NotConnected = 302,
    DialFailed = 303,

    // Wire codec errors (4xx)
    FrameTooLarge = 400,
    FrameMalformed = 401,

    // Sync role errors (5xx)
    SocketPathInvalid = 500,
    AddressInUse = 501,
    ListenFailed = 502,
    AlreadyStopped = 503,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transport failure should be treated by the loop that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Deadline exceeded; retry the same operation
    Timeout,
    /// Peer is gone; reconnect (client) or drop the peer (server)
    Closed,
    /// Failure of this one operation only
    Other,
}

/// Main error type for tasksync
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────

    /// A read, write or dial did not finish before its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No connection is currently held
    #[error("Not connected to {path}")]
    NotConnected { path: PathBuf },

    /// Dialing the rendezvous socket failed
    #[error("Failed to connect to {path}")]
    DialFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // Wire Codec Errors
    // ─────────────────────────────────────────────────────────────

    /// Encoded frame exceeds the maximum frame size
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame could not be decoded
    #[error("Malformed frame: {0}")]
    FrameMalformed(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Sync Role Errors
    // ─────────────────────────────────────────────────────────────

    /// Rendezvous socket path rejected
    #[error("Invalid socket path {path}: {reason}")]
    SocketPathInvalid { path: PathBuf, reason: String },

    /// Another live instance already serves this socket
    #[error("Socket {path} is already served by another instance")]
    AddressInUse { path: PathBuf },

    /// Binding or listening on the socket failed
    #[error("Failed to listen on {path}")]
    ListenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Operation on a coordinator that has been stopped
    #[error("Sync coordinator already stopped")]
    AlreadyStopped,

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => match classify_io(e) {
                    TransportErrorKind::Timeout => ErrorCode::TransportTimeout,
                    TransportErrorKind::Closed => ErrorCode::TransportClosed,
                    TransportErrorKind::Other => ErrorCode::IoRead,
                },
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Timeout { .. } => ErrorCode::TransportTimeout,
            Error::ConnectionClosed => ErrorCode::TransportClosed,
            Error::NotConnected { .. } => ErrorCode::NotConnected,
            Error::DialFailed { .. } => ErrorCode::DialFailed,

            Error::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
            Error::FrameMalformed(_) => ErrorCode::FrameMalformed,

            Error::SocketPathInvalid { .. } => ErrorCode::SocketPathInvalid,
            Error::AddressInUse { .. } => ErrorCode::AddressInUse,
            Error::ListenFailed { .. } => ErrorCode::ListenFailed,
            Error::AlreadyStopped => ErrorCode::AlreadyStopped,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Classify this error for the read/write loops
    pub fn transport_kind(&self) -> TransportErrorKind {
        match self {
            Error::Timeout { .. } => TransportErrorKind::Timeout,
            Error::ConnectionClosed | Error::NotConnected { .. } => TransportErrorKind::Closed,
            Error::Io(e) => classify_io(e),
            _ => TransportErrorKind::Other,
        }
    }

    /// Deadline exceeded
    pub fn is_timeout(&self) -> bool {
        self.transport_kind() == TransportErrorKind::Timeout
    }

    /// Connection permanently unusable
    pub fn is_closed(&self) -> bool {
        self.transport_kind() == TransportErrorKind::Closed
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.transport_kind(),
            TransportErrorKind::Timeout | TransportErrorKind::Closed
        ) || matches!(self, Error::DialFailed { .. })
    }

    /// Check if the error is fatal (the command should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::SocketPathInvalid { .. }
                | Error::ListenFailed { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'tasksync config init' to create a default configuration file.",
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'tasksync config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            Error::SocketPathInvalid { .. } => Some(
                "Unix socket paths must be absolute and at most 100 characters. Set a shorter 'state_dir' or 'socket_path'.",
            ),
            Error::ListenFailed { .. } => Some(
                "Check that the state directory exists and is writable.",
            ),
            Error::NotConnected { .. } | Error::DialFailed { .. } => Some(
                "The primary instance may have exited. Changes will sync again once it is back.",
            ),
            Error::FrameTooLarge { .. } => Some(
                "A peer sent an oversized message. It was dropped; the connection stays usable.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

/// Map an io error onto the transport classification
pub fn classify_io(err: &io::Error) -> TransportErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => TransportErrorKind::Closed,
        _ => TransportErrorKind::Other,
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a socket path validation error
    pub fn socket_path_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::SocketPathInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Error::Timeout { operation, after }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
