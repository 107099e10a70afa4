//! C-ABI wrapper around `requests-core`.
//!
//! # Overview
//! Lets an iOS or Android host submit HTTP requests to a Rust client and
//! receive the results through C function pointers, without linking to any
//! Rust types.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - A client handle belongs to the thread that created it. Requests run on
//!   the client's worker thread, but callbacks only fire from inside
//!   `requests_dispatch_pending` / `requests_wait` on the owning thread, so
//!   hosts pump them from their main loop.
//! - Strings handed to callbacks are borrowed for the duration of the call.
//!   Strings returned from functions are owned by the caller and released
//!   with `requests_free_string`.

pub mod types;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use requests_core::{join_url, FieldKind, FormData, HttpClient, RequestId};

use types::*;

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client whose relative request URLs are joined onto `base_url`.
/// `base_url` may be an empty string.
///
/// Returns null if `base_url` is null or the worker thread cannot start.
/// The caller must free the returned pointer with `requests_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn requests_client_new(base_url: *const c_char) -> *mut FfiClient {
    catch_unwind(|| {
        let Some(base_url) = str_arg(base_url) else {
            return std::ptr::null_mut();
        };
        match HttpClient::new(base_url) {
            Ok(inner) => Box::into_raw(Box::new(FfiClient { inner })),
            Err(err) => {
                log::error!("requests_client_new: {err}");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Create a client from a JSON config document:
/// `{"base_url": "...", "options": {"connect_timeout_ms": 15000,
/// "read_timeout_ms": 15000}, "proxy": {"host": "...", "port": 1080}}`.
/// Every key is optional.
///
/// Returns null if `json` is null or malformed.
#[unsafe(no_mangle)]
pub extern "C" fn requests_client_from_config(json: *const c_char) -> *mut FfiClient {
    catch_unwind(|| {
        let Some(json) = str_arg(json) else {
            return std::ptr::null_mut();
        };
        match HttpClient::from_config(json) {
            Ok(inner) => Box::into_raw(Box::new(FfiClient { inner })),
            Err(err) => {
                log::error!("requests_client_from_config: {err}");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client. Queued requests still run, but their callbacks are never
/// delivered. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn requests_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Multipart forms
// ---------------------------------------------------------------------------

/// Create an empty multipart body. Free with `requests_form_free`.
#[unsafe(no_mangle)]
pub extern "C" fn requests_form_new() -> *mut FfiForm {
    catch_unwind(|| {
        Box::into_raw(Box::new(FfiForm {
            inner: FormData::new(),
        }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Append a field. `kind` is 1 for text (`value` is the content) or 2 for a
/// file (`value` is its path).
///
/// Returns false, leaving the form unchanged, if any pointer is null or
/// `kind` is unsupported.
#[unsafe(no_mangle)]
pub extern "C" fn requests_form_append(
    form: *mut FfiForm,
    kind: i32,
    name: *const c_char,
    value: *const c_char,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if form.is_null() {
            return false;
        }
        let (Some(name), Some(value)) = (str_arg(name), str_arg(value)) else {
            return false;
        };
        let kind = match FieldKind::try_from(kind) {
            Ok(kind) => kind,
            Err(err) => {
                log::warn!("requests_form_append: {err}");
                return false;
            }
        };
        let form = unsafe { &mut *form };
        form.inner.append(kind, name, value);
        true
    }))
    .unwrap_or(false)
}

/// Total encoded byte length of the form, as it will be declared on the
/// wire. 0 for a null form.
#[unsafe(no_mangle)]
pub extern "C" fn requests_form_content_length(form: *const FfiForm) -> u64 {
    if form.is_null() {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| unsafe { &*form }.inner.content_length())).unwrap_or(0)
}

/// Free a form. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn requests_form_free(form: *mut FfiForm) {
    if !form.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(form) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Queue a request on `client`. `callbacks` receives its events.
///
/// Returns the request id (never 0), or 0 if `client`/`request` is null or
/// the request lacks a method or URL. Every other problem, including an
/// unsupported method or a malformed URL, is reported through `on_error`.
#[unsafe(no_mangle)]
pub extern "C" fn requests_send(
    client: *const FfiClient,
    request: *const FfiRequest,
    callbacks: FfiCallbacks,
) -> u64 {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() || request.is_null() {
            return 0;
        }
        let client = unsafe { &*client };
        let Some(request) = (unsafe { (*request).to_core() }) else {
            return 0;
        };
        client.inner.submit(request, ForeignListener(callbacks)).0
    }))
    .unwrap_or(0)
}

/// Deliver every event posted so far. Returns how many were delivered.
#[unsafe(no_mangle)]
pub extern "C" fn requests_dispatch_pending(client: *const FfiClient) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return 0;
        }
        let client = unsafe { &*client };
        client.inner.dispatch_pending() as u32
    }))
    .unwrap_or(0)
}

/// Block, delivering events, until request `id` has finished or
/// `timeout_ms` elapses. Returns true if it finished.
#[unsafe(no_mangle)]
pub extern "C" fn requests_wait(client: *const FfiClient, id: u64, timeout_ms: u64) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return false;
        }
        let client = unsafe { &*client };
        client
            .inner
            .wait(RequestId(id), Duration::from_millis(timeout_ms))
    }))
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Join `base` and `path` with exactly one `/` between them.
///
/// Returns null if either argument is null. Free with
/// `requests_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn requests_join_url(base: *const c_char, path: *const c_char) -> *mut c_char {
    catch_unwind(|| {
        let (Some(base), Some(path)) = (str_arg(base), str_arg(path)) else {
            return std::ptr::null_mut();
        };
        c_string(&join_url(base, path)).into_raw()
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn requests_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}
