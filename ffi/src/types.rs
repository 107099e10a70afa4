//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Inbound types (`FfiRequest`, `FfiHeader`, `FfiConnectOptions`,
//! `FfiProxy`) are owned by the C caller and only read here. Outbound event
//! types are built on the stack for the duration of one callback: every
//! pointer inside them is valid until the callback returns and must be
//! copied if the host wants to keep it.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use requests_core::{
    ConnectOptions, ErrorCode, FormData, HttpClient, HttpError, HttpRequest, HttpResponse, Listener,
    Payload, Proxy, ReadyState, Stage, UploadProgress,
};

/// Opaque handle to an `HttpClient`. Must only be used from the thread
/// that created it.
pub struct FfiClient {
    pub(crate) inner: HttpClient,
}

/// Opaque handle to a multipart body under construction.
pub struct FfiForm {
    pub(crate) inner: FormData,
}

// ---------------------------------------------------------------------------
// Request input
// ---------------------------------------------------------------------------

/// A single request header.
#[repr(C)]
pub struct FfiHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Socket timeouts in milliseconds. 0 disables a timeout;
/// `write_timeout_ms` 0 keeps the platform default.
#[repr(C)]
pub struct FfiConnectOptions {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

/// SOCKS5 proxy. `username`/`password` may be null.
#[repr(C)]
pub struct FfiProxy {
    pub host: *const c_char,
    pub port: u16,
    pub username: *const c_char,
    pub password: *const c_char,
}

/// Request description. `method` and `url` are required; everything else
/// may be null. When both `form` and `body` are set, `form` wins. The form
/// is copied, so the caller still frees it.
#[repr(C)]
pub struct FfiRequest {
    pub method: *const c_char,
    pub url: *const c_char,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const c_char,
    pub form: *const FfiForm,
    pub options: *const FfiConnectOptions,
    pub proxy: *const FfiProxy,
}

/// Borrow a C string as UTF-8. Null and invalid UTF-8 give `None`.
pub(crate) fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

impl FfiRequest {
    /// Convert into a core request. `None` if `method` or `url` is missing.
    ///
    /// # Safety
    /// Every non-null pointer must be valid for the documented length.
    pub(crate) unsafe fn to_core(&self) -> Option<HttpRequest> {
        let mut request = HttpRequest::new(str_arg(self.method)?, str_arg(self.url)?);

        if !self.headers.is_null() {
            let headers = unsafe { std::slice::from_raw_parts(self.headers, self.headers_len as usize) };
            for header in headers {
                if let (Some(key), Some(value)) = (str_arg(header.key), str_arg(header.value)) {
                    request.headers.insert(key, value);
                }
            }
        }

        if !self.form.is_null() {
            let form = unsafe { &*self.form };
            request.payload = Some(Payload::Form(form.inner.clone()));
        } else if let Some(body) = str_arg(self.body) {
            request.payload = Some(Payload::Text(body.to_string()));
        }

        if !self.options.is_null() {
            let options = unsafe { &*self.options };
            request.options = Some(ConnectOptions {
                connect_timeout_ms: options.connect_timeout_ms,
                read_timeout_ms: options.read_timeout_ms,
                write_timeout_ms: (options.write_timeout_ms > 0).then_some(options.write_timeout_ms),
            });
        }

        if !self.proxy.is_null() {
            let proxy = unsafe { &*self.proxy };
            let mut core = Proxy::new(str_arg(proxy.host)?, proxy.port);
            if let (Some(user), Some(pass)) = (str_arg(proxy.username), str_arg(proxy.password)) {
                core = core.with_credentials(user, pass);
            }
            request.proxy = Some(core);
        }

        Some(request)
    }
}

// ---------------------------------------------------------------------------
// Event output
// ---------------------------------------------------------------------------

/// Mirrors `requests_core::ErrorCode`; discriminants are identical.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
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

impl From<ErrorCode> for FfiErrorCode {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Unknown => FfiErrorCode::Unknown,
            ErrorCode::InvalidUrl => FfiErrorCode::InvalidUrl,
            ErrorCode::InvalidRequestMethod => FfiErrorCode::InvalidRequestMethod,
            ErrorCode::ConnectionRefused => FfiErrorCode::ConnectionRefused,
            ErrorCode::SslCertificateInvalid => FfiErrorCode::SslCertificateInvalid,
            ErrorCode::FileDoesNotExist => FfiErrorCode::FileDoesNotExist,
            ErrorCode::FileReadPermissionDenied => FfiErrorCode::FileReadPermissionDenied,
            ErrorCode::NetworkUnreachable => FfiErrorCode::NetworkUnreachable,
            ErrorCode::ConnectionTimedOut => FfiErrorCode::ConnectionTimedOut,
            ErrorCode::LostConnection => FfiErrorCode::LostConnection,
            ErrorCode::CannotSerialize => FfiErrorCode::CannotSerialize,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStage {
    Validating = 0,
    Connecting = 1,
    Sending = 2,
    Receiving = 3,
    Cleaning = 4,
}

impl From<Stage> for FfiStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Validating => FfiStage::Validating,
            Stage::Connecting => FfiStage::Connecting,
            Stage::Sending => FfiStage::Sending,
            Stage::Receiving => FfiStage::Receiving,
            Stage::Cleaning => FfiStage::Cleaning,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiReadyState {
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl From<ReadyState> for FfiReadyState {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Opened => FfiReadyState::Opened,
            ReadyState::HeadersReceived => FfiReadyState::HeadersReceived,
            ReadyState::Loading => FfiReadyState::Loading,
            ReadyState::Done => FfiReadyState::Done,
        }
    }
}

#[repr(C)]
pub struct FfiResponse {
    pub status: u16,
    pub status_text: *const c_char,
    pub text: *const c_char,
    pub url: *const c_char,
}

#[repr(C)]
pub struct FfiError {
    pub code: FfiErrorCode,
    pub stage: FfiStage,
    pub reason: *const c_char,
}

#[repr(C)]
pub struct FfiUploadProgress {
    pub file: *const c_char,
    pub uploaded: u64,
    pub total: u64,
    pub file_number: u32,
    pub files_count: u32,
}

/// Host callbacks for one request, invoked on the thread that calls
/// `requests_dispatch_pending` / `requests_wait`. `user_data` is passed
/// back untouched. Any callback may be null.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiCallbacks {
    pub user_data: *mut c_void,
    pub on_response: Option<extern "C" fn(user_data: *mut c_void, response: *const FfiResponse)>,
    pub on_error: Option<extern "C" fn(user_data: *mut c_void, error: *const FfiError)>,
    pub on_upload_progress: Option<extern "C" fn(user_data: *mut c_void, progress: *const FfiUploadProgress)>,
    pub on_ready_state: Option<extern "C" fn(user_data: *mut c_void, state: FfiReadyState)>,
}

/// Interior NULs cannot cross as C strings; they are dropped.
pub(crate) fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

/// Adapts `FfiCallbacks` to the core `Listener` trait.
pub(crate) struct ForeignListener(pub(crate) FfiCallbacks);

impl Listener for ForeignListener {
    fn on_response(&mut self, response: &HttpResponse) {
        let Some(callback) = self.0.on_response else {
            return;
        };
        let status_text = c_string(&response.status_text);
        let text = c_string(&response.text);
        let url = c_string(&response.url);
        let ffi = FfiResponse {
            status: response.status,
            status_text: status_text.as_ptr(),
            text: text.as_ptr(),
            url: url.as_ptr(),
        };
        callback(self.0.user_data, &ffi);
    }

    fn on_error(&mut self, error: &HttpError) {
        let Some(callback) = self.0.on_error else {
            return;
        };
        let reason = c_string(&error.reason);
        let ffi = FfiError {
            code: error.code.into(),
            stage: error.stage.into(),
            reason: reason.as_ptr(),
        };
        callback(self.0.user_data, &ffi);
    }

    fn on_file_upload_progress(&mut self, progress: &UploadProgress) {
        let Some(callback) = self.0.on_upload_progress else {
            return;
        };
        let file = c_string(&progress.file.to_string_lossy());
        let ffi = FfiUploadProgress {
            file: file.as_ptr(),
            uploaded: progress.uploaded,
            total: progress.total,
            file_number: progress.file_number as u32,
            files_count: progress.files_count as u32,
        };
        callback(self.0.user_data, &ffi);
    }

    fn on_ready_state_change(&mut self, state: ReadyState) {
        if let Some(callback) = self.0.on_ready_state {
            callback(self.0.user_data, state.into());
        }
    }
}
