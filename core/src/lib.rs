//! Asynchronous HTTP request execution for mobile app cores.
//!
//! # Overview
//! A caller describes a request (`HttpRequest`: method, URL, payload,
//! headers, timeouts, optional SOCKS5 proxy) and submits it to an
//! `HttpClient` together with a `Listener`. The request runs on the client's
//! background worker; its events (ready-state changes, per-file upload
//! progress, and exactly one terminal response or error) are delivered back
//! on the thread that owns the client whenever it pumps the dispatcher.
//!
//! # Design
//! - One worker thread per client: requests of a client run one at a time in
//!   submission order, and no blocking I/O happens on the owning thread.
//! - `executor` is a strict stage sequence (validating, connecting, sending,
//!   receiving, cleaning). Every failure is classified once into a closed
//!   `ErrorCode` plus the `Stage` it happened in.
//! - `transport` is a trait seam (`Connector` / `Connection`), with a
//!   blocking HTTP/1.1 implementation over TCP or rustls by default.
//! - Multipart bodies (`FormData`) compute their exact length up front and
//!   are streamed with fixed-length framing.
//! - Types use owned `String` / `Vec` fields to simplify FFI mapping.

pub mod classifier;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod form;
pub mod http;
mod socks;
pub mod transport;
pub mod worker;

pub use client::{ClientError, HttpClient};
pub use config::{ClientConfig, ConnectOptions, Proxy};
pub use dispatch::{Callbacks, Event, Listener, ReadyState, RequestId, UploadProgress};
pub use error::{ErrorCode, HttpError, Stage};
pub use form::{FieldKind, FormData};
pub use http::{join_url, Headers, HttpMethod, HttpRequest, HttpResponse, Payload};
