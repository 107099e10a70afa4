//! Per-client facade: one worker, one dispatcher, shared defaults.
//!
//! # Design
//! `HttpClient` lives on the thread that creates it (it is `!Send`, because
//! the dispatcher holds non-`Send` listeners). `submit` registers the
//! listeners, then queues the request on the client's worker and returns
//! immediately. Requests from one client run strictly one after another in
//! submission order; separate clients have separate workers and run in
//! parallel. Events reach listeners only when the owning thread calls
//! `dispatch_pending` or `wait`.

use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, ConnectOptions, Proxy};
use crate::dispatch::{Dispatcher, Event, Listener, RequestId};
use crate::executor;
use crate::http::HttpRequest;
use crate::transport::{Connector, TcpConnector};
use crate::worker::Worker;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid client config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("cannot start worker thread: {0}")]
    Worker(#[from] io::Error),
}

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

pub struct HttpClient {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    worker: Worker,
    dispatcher: Dispatcher,
    next_id: Cell<u64>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("worker", &self.worker.name())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Client with `base_url` and default options (15 s timeouts, no proxy).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_config(ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        })
    }

    /// Client configured from a JSON `ClientConfig` document.
    pub fn from_config(json: &str) -> Result<Self, ClientError> {
        Self::with_config(ClientConfig::from_json(json)?)
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Client that opens connections through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ClientError> {
        let number = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::spawn(format!("requests-worker-{number}"))?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            worker,
            dispatcher: Dispatcher::new(),
            next_id: Cell::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.config.options
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.config.proxy.as_ref()
    }

    /// Queue `request`; its events go to `listener`.
    pub fn submit(&self, request: HttpRequest, listener: impl Listener + 'static) -> RequestId {
        self.submit_to(request, vec![Box::new(listener)])
    }

    /// Queue `request` with any number of listeners, including none.
    pub fn submit_to(&self, request: HttpRequest, listeners: Vec<Box<dyn Listener>>) -> RequestId {
        let id = RequestId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.dispatcher.register(id, listeners);
        log::debug!("queueing request {id}: {} {}", request.method, request.url);

        let config = self.config.clone();
        let connector = self.connector.clone();
        let events = self.dispatcher.sender();
        let queued = self.worker.submit(Box::new(move || {
            let outcome = executor::execute(connector.as_ref(), &config, request, &mut |event| {
                events.send(id, event)
            });
            events.send(id, Event::from(outcome));
        }));
        if let Err(err) = queued {
            log::error!("request {id} dropped: {err}");
        }
        id
    }

    /// Attach another listener to a request that has not finished.
    pub fn add_listener(&self, id: RequestId, listener: impl Listener + 'static) -> bool {
        self.dispatcher.add_listener(id, Box::new(listener))
    }

    /// Deliver all events posted so far. Returns how many were delivered.
    pub fn dispatch_pending(&self) -> usize {
        self.dispatcher.dispatch_pending()
    }

    /// Deliver events until `id` finishes or `timeout` elapses.
    pub fn wait(&self, id: RequestId, timeout: Duration) -> bool {
        self.dispatcher.wait(id, timeout)
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.dispatcher.is_pending(id)
    }

    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }
}
