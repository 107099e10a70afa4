//! Delivery of request events to listeners on the owning thread.
//!
//! # Design
//! The worker never calls listeners. It posts `(RequestId, Event)` pairs
//! into a channel through an `EventSender`; the thread that owns the
//! `Dispatcher` pulls them out with `dispatch_pending` or `wait` and invokes
//! the listeners registered for that request. Listeners therefore need not
//! be `Send`, and a UI host can pump the dispatcher from its main loop.
//!
//! Events for one request are delivered in the order they were posted. The
//! terminal event (`Response` or `Error`) is the last one a listener sees:
//! delivering it unregisters the request's listeners. Calls to
//! `dispatch_pending` or `wait` made from inside a callback do nothing, so
//! callbacks never nest. A panicking listener is logged and skipped; the
//! remaining listeners still see the event.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crate::error::HttpError;
use crate::http::HttpResponse;

/// Identifies one submitted request within its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// XMLHttpRequest-style progress markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

/// Progress of one file inside a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub file: PathBuf,
    /// Bytes of this file written so far.
    pub uploaded: u64,
    /// Size of this file as measured when it was appended.
    pub total: u64,
    /// 1-based ordinal among the body's file fields.
    pub file_number: usize,
    pub files_count: usize,
}

impl UploadProgress {
    pub fn is_last_file(&self) -> bool {
        self.file_number == self.files_count
    }

    pub fn is_file_complete(&self) -> bool {
        self.uploaded >= self.total
    }
}

#[derive(Debug)]
pub enum Event {
    ReadyState(ReadyState),
    UploadProgress(UploadProgress),
    Response(HttpResponse),
    Error(HttpError),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Response(_) | Event::Error(_))
    }
}

impl From<Result<HttpResponse, HttpError>> for Event {
    fn from(outcome: Result<HttpResponse, HttpError>) -> Self {
        match outcome {
            Ok(response) => Event::Response(response),
            Err(error) => Event::Error(error),
        }
    }
}

/// Receives the events of one request. Every method defaults to a no-op.
pub trait Listener {
    fn on_response(&mut self, _response: &HttpResponse) {}

    fn on_error(&mut self, _error: &HttpError) {}

    fn on_file_upload_progress(&mut self, _progress: &UploadProgress) {}

    fn on_ready_state_change(&mut self, _state: ReadyState) {}
}

/// Closure-backed `Listener`.
///
/// ```
/// use requests_core::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .response(|r| println!("{} {}", r.status, r.text))
///     .error(|e| eprintln!("{e}"));
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct Callbacks {
    response: Option<Box<dyn FnMut(&HttpResponse)>>,
    error: Option<Box<dyn FnMut(&HttpError)>>,
    upload_progress: Option<Box<dyn FnMut(&UploadProgress)>>,
    ready_state: Option<Box<dyn FnMut(ReadyState)>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(mut self, f: impl FnMut(&HttpResponse) + 'static) -> Self {
        self.response = Some(Box::new(f));
        self
    }

    pub fn error(mut self, f: impl FnMut(&HttpError) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn upload_progress(mut self, f: impl FnMut(&UploadProgress) + 'static) -> Self {
        self.upload_progress = Some(Box::new(f));
        self
    }

    pub fn ready_state(mut self, f: impl FnMut(ReadyState) + 'static) -> Self {
        self.ready_state = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("response", &self.response.is_some())
            .field("error", &self.error.is_some())
            .field("upload_progress", &self.upload_progress.is_some())
            .field("ready_state", &self.ready_state.is_some())
            .finish()
    }
}

impl Listener for Callbacks {
    fn on_response(&mut self, response: &HttpResponse) {
        if let Some(f) = self.response.as_mut() {
            f(response);
        }
    }

    fn on_error(&mut self, error: &HttpError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }

    fn on_file_upload_progress(&mut self, progress: &UploadProgress) {
        if let Some(f) = self.upload_progress.as_mut() {
            f(progress);
        }
    }

    fn on_ready_state_change(&mut self, state: ReadyState) {
        if let Some(f) = self.ready_state.as_mut() {
            f(state);
        }
    }
}

/// Posting half of the dispatcher channel; handed to the worker.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<(RequestId, Event)>,
}

impl EventSender {
    pub fn send(&self, id: RequestId, event: Event) {
        if self.tx.send((id, event)).is_err() {
            log::debug!("dispatcher dropped, discarding event for request {id}");
        }
    }
}

pub struct Dispatcher {
    tx: Sender<(RequestId, Event)>,
    rx: Receiver<(RequestId, Event)>,
    listeners: RefCell<HashMap<RequestId, Vec<Box<dyn Listener>>>>,
    delivering: Cell<bool>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.listeners.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            listeners: RefCell::new(HashMap::new()),
            delivering: Cell::new(false),
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Start tracking `id`. Must happen before the request is handed to the
    /// worker, or early events are dropped.
    pub fn register(&self, id: RequestId, listeners: Vec<Box<dyn Listener>>) {
        self.listeners.borrow_mut().entry(id).or_default().extend(listeners);
    }

    /// Attach one more listener to a request that has not finished yet.
    /// Returns `false` when `id` is unknown or already terminated.
    pub fn add_listener(&self, id: RequestId, listener: Box<dyn Listener>) -> bool {
        match self.listeners.borrow_mut().get_mut(&id) {
            Some(listeners) => {
                listeners.push(listener);
                true
            }
            None => false,
        }
    }

    /// Whether `id` has been registered and not yet seen its terminal event.
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.listeners.borrow().contains_key(&id)
    }

    /// Number of requests still awaiting a terminal event.
    pub fn pending_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver every event already posted, without blocking. Returns how
    /// many events were delivered.
    pub fn dispatch_pending(&self) -> usize {
        if self.delivering.get() {
            return 0;
        }
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok((id, event)) => {
                    self.deliver(id, event);
                    delivered += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return delivered,
            }
        }
    }

    /// Block, delivering events for any request, until `id` has received
    /// its terminal event or `timeout` elapses. Returns whether `id` is done.
    pub fn wait(&self, id: RequestId, timeout: Duration) -> bool {
        if self.delivering.get() {
            log::warn!("wait({id}) called from inside a callback; ignoring");
            return !self.is_pending(id);
        }
        let deadline = Instant::now() + timeout;
        while self.is_pending(id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok((event_id, event)) => self.deliver(event_id, event),
                Err(RecvTimeoutError::Timeout) => return false,
                // unreachable while self.tx is alive
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn deliver(&self, id: RequestId, event: Event) {
        let terminal = event.is_terminal();
        // take the listeners out so callbacks can register or submit freely
        let Some(mut listeners) = self.listeners.borrow_mut().remove(&id) else {
            log::debug!("no listeners for request {id}, dropping {event:?}");
            return;
        };

        self.delivering.set(true);
        for listener in listeners.iter_mut() {
            let call = panic::catch_unwind(AssertUnwindSafe(|| match &event {
                Event::ReadyState(state) => listener.on_ready_state_change(*state),
                Event::UploadProgress(progress) => listener.on_file_upload_progress(progress),
                Event::Response(response) => listener.on_response(response),
                Event::Error(error) => listener.on_error(error),
            }));
            if call.is_err() {
                log::error!("listener for request {id} panicked");
            }
        }
        self.delivering.set(false);

        let mut map = self.listeners.borrow_mut();
        if terminal {
            map.remove(&id);
            log::debug!("request {id} finished");
        } else {
            let added = map.remove(&id).unwrap_or_default();
            listeners.extend(added);
            map.insert(id, listeners);
        }
    }
}
