//! Error types for the request execution engine.
//!
//! # Design
//! Two layers. `Failure` is the raw cause as produced by the transport, the
//! multipart writer, or payload serialization; it keeps the typed source so
//! the classifier can inspect it. `HttpError` is what callers see: a closed
//! `ErrorCode`, the `Stage` that was active, and the human-readable cause.
//! Callers branch on `code` and `stage` only; `reason` is for logs.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Closed taxonomy of request failures. Discriminants are stable and cross
/// the FFI boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Unknown = 0,
    InvalidUrl = 1,
    InvalidRequestMethod = 2,
    ConnectionRefused = 3,
    SslCertificateInvalid = 4,
    FileDoesNotExist = 5,
    FileReadPermissionDenied = 6,
    NetworkUnreachable = 7,
    ConnectionTimedOut = 8,
    LostConnection = 9,
    CannotSerialize = 10,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidUrl => "invalid URL",
            ErrorCode::InvalidRequestMethod => "invalid request method",
            ErrorCode::ConnectionRefused => "connection refused",
            ErrorCode::SslCertificateInvalid => "SSL certificate invalid",
            ErrorCode::FileDoesNotExist => "file does not exist",
            ErrorCode::FileReadPermissionDenied => "file read permission denied",
            ErrorCode::NetworkUnreachable => "network unreachable",
            ErrorCode::ConnectionTimedOut => "connection timed out",
            ErrorCode::LostConnection => "lost connection",
            ErrorCode::CannotSerialize => "cannot serialize payload",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the request lifecycle a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    Validating = 0,
    Connecting = 1,
    Sending = 2,
    Receiving = 3,
    Cleaning = 4,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Connecting => "connecting",
            Stage::Sending => "sending",
            Stage::Receiving => "receiving",
            Stage::Cleaning => "cleaning",
        };
        f.write_str(name)
    }
}

/// The terminal error of a request, as delivered to `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} while {stage}: {reason}")]
pub struct HttpError {
    pub code: ErrorCode,
    pub stage: Stage,
    /// Underlying cause text. Not meant for programmatic branching.
    pub reason: String,
}

impl HttpError {
    pub fn new(code: ErrorCode, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            reason: reason.into(),
        }
    }
}

/// Raw failure before classification.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("malformed URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed URL: {0}")]
    UnsupportedUrl(String),

    #[error("unsupported request method: {0}")]
    Method(String),

    #[error("TLS handshake failed: {0}")]
    Tls(#[source] rustls::Error),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Failure {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Failure::File {
            path: path.into(),
            source,
        }
    }
}
