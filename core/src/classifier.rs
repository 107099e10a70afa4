//! Maps raw failures to the closed `ErrorCode` taxonomy.
//!
//! # Design
//! Classification is a pure function of the failure and the active stage.
//! Typed `io::ErrorKind` values are consulted first; the platform message
//! substrings (`ECONNREFUSED`, `ENOENT`, ...) are only a fallback for errors
//! that arrive as free text, e.g. relayed by a proxy. Whatever matches
//! neither ends up as `Unknown`, tagged with the stage.

use std::io::{self, ErrorKind};

use crate::error::{ErrorCode, Failure, HttpError, Stage};

/// Classify `failure` as it surfaced during `stage`.
pub fn classify(failure: &Failure, stage: Stage) -> ErrorCode {
    match failure {
        Failure::Url(_) | Failure::UnsupportedUrl(_) => ErrorCode::InvalidUrl,
        Failure::Method(_) => ErrorCode::InvalidRequestMethod,
        Failure::Tls(_) => ErrorCode::SslCertificateInvalid,
        Failure::Serialize(_) => ErrorCode::CannotSerialize,
        Failure::File { source, .. } => classify_file(source),
        Failure::Io(err) => classify_io(err, stage),
    }
}

/// Classify and wrap `failure` into the caller-facing error value.
pub fn to_http_error(failure: Failure, stage: Stage) -> HttpError {
    let code = classify(&failure, stage);
    log::warn!("request failed while {stage}: {code} ({failure})");
    HttpError::new(code, stage, failure.to_string())
}

fn classify_io(err: &io::Error, stage: Stage) -> ErrorCode {
    if is_tls(err) {
        return ErrorCode::SslCertificateInvalid;
    }
    if stage == Stage::Connecting {
        if let Some(code) = classify_connect(err) {
            return code;
        }
    }
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => ErrorCode::LostConnection,
        // SO_RCVTIMEO expiry reports EAGAIN on unix and WSAETIMEDOUT on windows
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorCode::ConnectionTimedOut,
        _ => ErrorCode::Unknown,
    }
}

fn classify_connect(err: &io::Error) -> Option<ErrorCode> {
    match err.kind() {
        ErrorKind::ConnectionRefused => Some(ErrorCode::ConnectionRefused),
        ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
            Some(ErrorCode::NetworkUnreachable)
        }
        ErrorKind::TimedOut => Some(ErrorCode::ConnectionTimedOut),
        _ => {
            let message = err.to_string();
            if message.contains("ECONNREFUSED") {
                Some(ErrorCode::ConnectionRefused)
            } else if message.contains("ENETUNREACH") {
                Some(ErrorCode::NetworkUnreachable)
            } else if message.contains("ETIMEDOUT") {
                Some(ErrorCode::ConnectionTimedOut)
            } else {
                None
            }
        }
    }
}

fn classify_file(err: &io::Error) -> ErrorCode {
    match err.kind() {
        ErrorKind::NotFound => ErrorCode::FileDoesNotExist,
        ErrorKind::PermissionDenied => ErrorCode::FileReadPermissionDenied,
        _ => {
            let message = err.to_string();
            if message.contains("ENOENT") {
                ErrorCode::FileDoesNotExist
            } else if message.contains("EACCES") {
                ErrorCode::FileReadPermissionDenied
            } else {
                ErrorCode::Unknown
            }
        }
    }
}

/// rustls reports handshake alerts as `InvalidData` io errors wrapping the
/// original `rustls::Error`.
fn is_tls(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
}
