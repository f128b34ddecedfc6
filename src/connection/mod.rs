//! Connection: one HTTP request and its whole lifecycle.
//!
//! The `Connection` handle and its methods are organized by concern:
//! - [`lifecycle`] - queue/start/suspend/resume/cancel transitions
//! - [`outcome`] - transport results, temp file relocation, terminal transition
//! - [`callbacks`] - success/failure callback registration
//! - [`request`] - default request construction
//!
//! A `Connection` is a cheap handle; clones refer to the same request and
//! compare equal. Distinct requests never compare equal.

mod callbacks;
mod lifecycle;
mod outcome;
mod request;

pub use callbacks::Reply;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use url::Url;

use crate::channel::Channel;
use crate::completion::Completion;
use crate::error::{ConnectionError, Error, Result};
use crate::headers::Headers;
use crate::manager::Plug;
use crate::parameters::Parameters;
use crate::persistence::PersistenceInfo;
use crate::transport::{HttpRequest, TransportOutcome, TransportTask};
use crate::types::{CachingPolicy, ConnectionId, Method, Response, State, TaskId};

/// Result body of a completed request
///
/// Either held in memory or stored in a file. A file-backed body is read at most
/// once; the bytes are cached on first access.
#[derive(Debug)]
pub struct ResultBody {
    source: BodySource,
    materialized: OnceCell<Bytes>,
}

#[derive(Debug)]
enum BodySource {
    Memory(Bytes),
    File(PathBuf),
}

impl ResultBody {
    pub(crate) fn memory(bytes: Bytes) -> Self {
        Self {
            source: BodySource::Memory(bytes),
            materialized: OnceCell::new(),
        }
    }

    pub(crate) fn file(path: PathBuf) -> Self {
        Self {
            source: BodySource::File(path),
            materialized: OnceCell::new(),
        }
    }

    /// File location, for bodies streamed to disk
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            BodySource::Memory(_) => None,
            BodySource::File(path) => Some(path),
        }
    }

    /// Body bytes, reading the file on first access
    pub async fn bytes(&self) -> std::io::Result<Bytes> {
        match &self.source {
            BodySource::Memory(bytes) => Ok(bytes.clone()),
            BodySource::File(path) => self
                .materialized
                .get_or_try_init(|| async {
                    tracing::trace!(path = %path.display(), "Materializing downloaded body");
                    tokio::fs::read(path).await.map(Bytes::from)
                })
                .await
                .cloned(),
        }
    }

    /// Whether the bytes are available without touching the disk
    pub fn is_materialized(&self) -> bool {
        match &self.source {
            BodySource::Memory(_) => true,
            BodySource::File(_) => self.materialized.initialized(),
        }
    }
}

/// What a released completion carries to its listeners
///
/// Holds no reference back to the connection, so a released completion never
/// keeps its connection alive.
#[derive(Clone, Debug)]
pub(crate) enum Resolution {
    Succeeded {
        id: ConnectionId,
        body: Arc<ResultBody>,
        response: Option<Response>,
    },
    Failed(ConnectionError),
}

/// Mutually exclusive request result
#[derive(Debug, Default)]
enum ResultSlot {
    #[default]
    Pending,
    Body(Arc<ResultBody>),
    Error(ConnectionError),
}

/// Mutable per-connection state, only touched by lifecycle methods and the
/// outcome handler
#[derive(Default)]
struct Lifecycle {
    state: State,
    headers: Option<Headers>,
    request: Option<HttpRequest>,
    caching_policy: CachingPolicy,
    download_to_file: bool,
    persistence: Option<PersistenceInfo>,
    channel: Option<Arc<dyn Channel>>,
    task: Option<Box<dyn TransportTask>>,
    task_id: Option<TaskId>,
    finishing: bool,
    /// Outcome reported while suspended, applied on resume
    parked: Option<TransportOutcome>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    response: Option<Response>,
    result: ResultSlot,
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    method: Method,
    url: Url,
    parameters: Parameters,
    placeholder: bool,
    plug: Plug,
    lifecycle: Mutex<Lifecycle>,
    completion: Completion<Resolution>,
}

/// Handle to one HTTP request
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl Connection {
    /// Create a connection in the `Waiting` state
    ///
    /// The method is normalized by the parameters (a body turns GET into POST).
    /// Fails with [`Error::InvalidUrl`] if `url` does not parse.
    pub fn new(plug: &Plug, method: Method, url: &str, parameters: Parameters) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::build(plug, method, parsed, parameters, false))
    }

    /// Harmless stand-in returned when a request could not be constructed
    ///
    /// Points at `about:blank` and never starts; its callbacks never run.
    pub(crate) fn placeholder(plug: &Plug) -> Self {
        let url = plug.placeholder_url.clone();
        Self::build(plug, Method::Get, url, Parameters::None, true)
    }

    fn build(
        plug: &Plug,
        method: Method,
        url: Url,
        parameters: Parameters,
        placeholder: bool,
    ) -> Self {
        let method = parameters.normalized_method(method);
        let inner = ConnectionInner {
            id: ConnectionId::next(),
            method,
            url,
            parameters,
            placeholder,
            plug: plug.clone(),
            lifecycle: Mutex::new(Lifecycle::default()),
            completion: Completion::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        // No user code runs under this lock
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn guard_unsent(lifecycle: &Lifecycle, operation: &str) -> Result<()> {
        if lifecycle.task_id.is_some() || lifecycle.state.is_terminal() {
            return Err(Error::InvalidState {
                operation: operation.to_string(),
                state: lifecycle.state.to_string(),
            });
        }
        Ok(())
    }

    /// Process-unique id
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// HTTP method (after normalization)
    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// Request URL as constructed (without parameter query)
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Request parameters
    pub fn parameters(&self) -> &Parameters {
        &self.inner.parameters
    }

    /// Whether this is the stand-in for a request that failed construction
    pub fn is_placeholder(&self) -> bool {
        self.inner.placeholder
    }

    /// Engine context this connection belongs to
    pub fn plug(&self) -> &Plug {
        &self.inner.plug
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Headers that will be sent (explicit headers, or the engine defaults)
    pub fn headers(&self) -> Headers {
        self.lock()
            .headers
            .clone()
            .unwrap_or_else(|| self.inner.plug.config().default_headers.clone())
    }

    /// Headers set explicitly on this connection, if any
    pub fn explicit_headers(&self) -> Option<Headers> {
        self.lock().headers.clone()
    }

    /// Replace the headers; only before the request is sent
    pub fn set_headers(&self, headers: Headers) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "set headers on")?;
        lifecycle.headers = Some(headers);
        Ok(())
    }

    /// Append one header; only before the request is sent
    ///
    /// The first explicit header replaces the engine defaults entirely.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "add header to")?;
        lifecycle
            .headers
            .get_or_insert_with(Headers::new)
            .append(name, value);
        Ok(())
    }

    /// Cache behaviour requested from the transport
    pub fn caching_policy(&self) -> CachingPolicy {
        self.lock().caching_policy
    }

    /// Change the caching policy; only before the request is sent
    pub fn set_caching_policy(&self, policy: CachingPolicy) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "set caching policy on")?;
        lifecycle.caching_policy = policy;
        Ok(())
    }

    /// Whether the body is streamed to a file instead of buffered
    pub fn download_to_file(&self) -> bool {
        self.lock().download_to_file
    }

    /// Choose file streaming; only before the request is sent
    pub fn set_download_to_file(&self, enabled: bool) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "change transfer mode of")?;
        lifecycle.download_to_file = enabled;
        Ok(())
    }

    /// Supply a complete request, bypassing default construction
    pub fn set_request(&self, request: HttpRequest) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "set request on")?;
        lifecycle.request = Some(request);
        Ok(())
    }

    /// Route this connection through `channel` instead of the engine default
    pub fn set_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state != State::Waiting {
            return Err(Error::InvalidState {
                operation: "change channel of".to_string(),
                state: lifecycle.state.to_string(),
            });
        }
        lifecycle.channel = Some(channel);
        Ok(())
    }

    /// Channel this connection reports to
    pub fn channel(&self) -> Arc<dyn Channel> {
        self.lock()
            .channel
            .clone()
            .unwrap_or_else(|| self.inner.plug.channel())
    }

    /// Persistence metadata, if the request should survive restarts
    pub fn persistence(&self) -> Option<PersistenceInfo> {
        self.lock().persistence.clone()
    }

    /// Attach persistence metadata; only before the request is sent
    pub fn set_persistence(&self, info: PersistenceInfo) -> Result<()> {
        let mut lifecycle = self.lock();
        Self::guard_unsent(&lifecycle, "set persistence on")?;
        lifecycle.persistence = Some(info);
        Ok(())
    }

    /// Transport task id, once started
    pub fn task_id(&self) -> Option<TaskId> {
        self.lock().task_id
    }

    /// When the transport task was resumed for the first time
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    /// When a terminal state was reached
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().completed_at
    }

    /// HTTP status code, if an HTTP response arrived
    pub fn status_code(&self) -> Option<u16> {
        self.lock().response.as_ref().and_then(Response::status_code)
    }

    /// Response metadata, if a response arrived
    pub fn response(&self) -> Option<Response> {
        self.lock().response.clone()
    }

    /// Result body handle, once completed
    pub fn result_body(&self) -> Option<Arc<ResultBody>> {
        match &self.lock().result {
            ResultSlot::Body(body) => Some(Arc::clone(body)),
            ResultSlot::Pending | ResultSlot::Error(_) => None,
        }
    }

    /// Result bytes, loading them from the downloaded file on first access
    pub async fn result_data(&self) -> Option<Bytes> {
        let body = self.result_body()?;
        match body.bytes().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id(),
                    error = %e,
                    "Failed to read downloaded body"
                );
                None
            }
        }
    }

    /// Location of the downloaded body, for file-streamed requests
    pub fn result_url(&self) -> Option<PathBuf> {
        self.result_body()
            .and_then(|body| body.path().map(Path::to_path_buf))
    }

    /// Transport failure, once completed with error
    pub fn result_error(&self) -> Option<ConnectionError> {
        match &self.lock().result {
            ResultSlot::Error(error) => Some(error.clone()),
            ResultSlot::Pending | ResultSlot::Body(_) => None,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("method", &self.method())
            .field("url", &self.url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let request = self.current_request();
        write!(
            f,
            "{} {} {}: {}",
            request.method,
            request.url,
            self.parameters(),
            self.state()
        )
    }
}
